//! In-memory write buffer backed by a skip list.
//!
//! The engine's concurrency model is single-threaded cooperative (there is exactly one
//! writer and it never reenters itself), so this skip list is a plain owned, arena-indexed
//! structure: nodes live in a `Vec` and are addressed by index, forward links are
//! `Option<usize>`. That sidesteps the atomic/epoch-reclaimed pointer chasing a
//! concurrent engine needs and keeps the whole module safe Rust.
//!
//! Node height is sampled geometrically: starting at level 0, keep climbing while a
//! fresh coin flip is below `promotion_p` and the level ceiling `max_level` has not been
//! reached.

use rand::Rng;

use crate::Value;

const DEFAULT_MAX_LEVEL: usize = 16;
const DEFAULT_PROMOTION_P: f64 = 0.5;

/// A single record slot in the memtable: either a live value or a tombstone, tagged
/// with the engine-wide sequence number that breaks recency ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    pub seq: u64,
}

impl Entry {
    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Value::Tombstone)
    }
}

struct Node {
    key: Vec<u8>,
    entry: Entry,
    forward: Vec<Option<usize>>,
}

/// Outcome of an [`SkipList::insert`] call, reported back to the facade for its result
/// record ("INSERT" vs "UPDATE").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Updated,
}

/// Ordered in-memory map from key to most-recent [`Entry`], realized as a skip list.
pub struct SkipList {
    nodes: Vec<Node>,
    /// Forward pointers out of the sentinel head, one per level.
    head: Vec<Option<usize>>,
    level: usize,
    max_level: usize,
    promotion_p: f64,
    len: usize,
    estimated_bytes: usize,
}

impl SkipList {
    pub fn new(max_level: usize, promotion_p: f64) -> Self {
        let max_level = max_level.max(1);
        SkipList {
            nodes: Vec::new(),
            head: vec![None; max_level],
            level: 1,
            max_level,
            promotion_p,
            len: 0,
            estimated_bytes: 0,
        }
    }

    /// `find_path[i]` is the index of the last node at level `i` whose key is strictly
    /// less than `key` (or `None` if that is the head sentinel).
    fn find_path(&self, key: &[u8]) -> Vec<Option<usize>> {
        let mut path = vec![None; self.max_level];
        let mut cur: Option<usize> = None;

        for lvl in (0..self.level).rev() {
            let mut next = match cur {
                Some(idx) => self.nodes[idx].forward[lvl],
                None => self.head[lvl],
            };
            loop {
                match next {
                    Some(idx) if self.nodes[idx].key.as_slice() < key => {
                        cur = Some(idx);
                        next = self.nodes[idx].forward[lvl];
                    }
                    _ => break,
                }
            }
            path[lvl] = cur;
        }
        path
    }

    fn random_level(&self) -> usize {
        let mut lvl = 1;
        let mut rng = rand::rng();
        while lvl < self.max_level && rng.random::<f64>() < self.promotion_p {
            lvl += 1;
        }
        lvl
    }

    /// Inserts or overwrites `key` with `entry`. Returns the outcome and the node's
    /// level (1-indexed height), matching the contract used by the facade's result
    /// record.
    pub fn insert(&mut self, key: Vec<u8>, entry: Entry) -> (InsertOutcome, usize) {
        let path = self.find_path(&key);

        let existing = path[0]
            .and_then(|idx| self.nodes[idx].forward[0])
            .or(self.head[0])
            .filter(|&idx| self.nodes[idx].key == key);

        if let Some(idx) = existing {
            self.estimated_bytes -= record_size(&self.nodes[idx].key, &self.nodes[idx].entry);
            self.estimated_bytes += record_size(&key, &entry);
            let height = self.nodes[idx].forward.len();
            self.nodes[idx].entry = entry;
            return (InsertOutcome::Updated, height);
        }

        let node_level = self.random_level();
        if node_level > self.level {
            self.level = node_level;
        }

        self.estimated_bytes += record_size(&key, &entry);
        let new_idx = self.nodes.len();
        self.nodes.push(Node {
            key,
            entry,
            forward: vec![None; node_level],
        });

        for lvl in 0..node_level {
            let prev = path.get(lvl).copied().flatten();
            match prev {
                Some(prev_idx) => {
                    self.nodes[new_idx].forward[lvl] = self.nodes[prev_idx].forward[lvl];
                    self.nodes[prev_idx].forward[lvl] = Some(new_idx);
                }
                None => {
                    self.nodes[new_idx].forward[lvl] = self.head[lvl];
                    self.head[lvl] = Some(new_idx);
                }
            }
        }

        self.len += 1;
        (InsertOutcome::Inserted, node_level)
    }

    /// Returns the entry stored for `key`, if any (tombstone or live value).
    pub fn search(&self, key: &[u8]) -> Option<&Entry> {
        let path = self.find_path(key);
        let candidate = path[0]
            .and_then(|idx| self.nodes[idx].forward[0])
            .or(self.head[0]);
        match candidate {
            Some(idx) if self.nodes[idx].key.as_slice() == key => Some(&self.nodes[idx].entry),
            _ => None,
        }
    }

    /// Removes `key` if present. Returns `true` if a node was unlinked. Note the
    /// engine never calls this directly on a live memtable — deletes are tombstone
    /// inserts — but it is exposed for completeness and for tests.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let path = self.find_path(key);
        let target = path[0]
            .and_then(|idx| self.nodes[idx].forward[0])
            .or(self.head[0]);

        let target_idx = match target {
            Some(idx) if self.nodes[idx].key.as_slice() == key => idx,
            _ => return false,
        };

        let target_height = self.nodes[target_idx].forward.len();
        for lvl in 0..target_height {
            let prev = path.get(lvl).copied().flatten();
            match prev {
                Some(prev_idx) => {
                    self.nodes[prev_idx].forward[lvl] = self.nodes[target_idx].forward[lvl];
                }
                None => {
                    self.head[lvl] = self.nodes[target_idx].forward[lvl];
                }
            }
        }

        while self.level > 1 && self.head[self.level - 1].is_none() {
            self.level -= 1;
        }

        self.estimated_bytes -=
            record_size(&self.nodes[target_idx].key, &self.nodes[target_idx].entry);
        self.len -= 1;
        true
    }

    /// Ordered walk over every live node, following level-0 forward pointers.
    pub fn iterate_ordered(&self) -> impl Iterator<Item = (&[u8], &Entry)> {
        let mut cur = self.head[0];
        std::iter::from_fn(move || {
            let idx = cur?;
            let node = &self.nodes[idx];
            cur = node.forward[0];
            Some((node.key.as_slice(), &node.entry))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn height(&self) -> usize {
        self.level
    }

    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }
}

fn record_size(key: &[u8], entry: &Entry) -> usize {
    let value_len = match &entry.value {
        Value::Bytes(b) => b.len(),
        Value::Tombstone => 0,
    };
    key.len() + value_len + std::mem::size_of::<u64>()
}
