//! Per-level storage and lookup orchestration over [`SSTable`]s.
//!
//! L0 tables may overlap in key range — they are searched newest-first so that a more
//! recent flush shadows an older one without needing timestamps at read time. L1 and
//! deeper levels are maintained with pairwise-disjoint ranges by the compaction engine,
//! so the manager can skip any table whose range does not contain the queried key.

use crate::sstable::{Lookup, SSTable};
use crate::Value;

/// One step of a read's search path, surfaced to callers/observers for teaching and
/// debugging purposes.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStep {
    pub level: u32,
    pub table_id: u64,
    pub hit: bool,
    pub bloom_saved: bool,
}

/// Result of [`SSTableManager::search`].
pub enum ManagerLookup {
    Hit {
        value: Value,
        path: Vec<SearchStep>,
    },
    Miss {
        path: Vec<SearchStep>,
    },
}

/// Holds the full set of SSTables, bucketed by level.
#[derive(Default)]
pub struct SSTableManager {
    levels: Vec<Vec<SSTable>>,
    next_id: u64,
}

impl SSTableManager {
    pub fn new() -> Self {
        SSTableManager {
            levels: Vec::new(),
            next_id: 0,
        }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_level(&mut self, level: u32) {
        let level = level as usize;
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
    }

    /// Appends `table` to `level`. L0 appends preserve insertion order (newest last);
    /// callers inserting at L>=1 are responsible for the range-disjointness invariant
    /// (compaction guarantees this by construction).
    pub fn add(&mut self, level: u32, table: SSTable) {
        self.ensure_level(level);
        tracing::debug!(level, id = table.id, records = table.len(), "sstable added to level");
        self.levels[level as usize].push(table);
    }

    pub fn get_level(&self, level: u32) -> &[SSTable] {
        self.levels
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Removes and returns every table currently at `level`.
    pub fn take_level(&mut self, level: u32) -> Vec<SSTable> {
        self.ensure_level(level);
        std::mem::take(&mut self.levels[level as usize])
    }

    /// Removes tables at `level` whose `id` is in `ids`, returning the removed tables.
    pub fn take_matching(&mut self, level: u32, ids: &[u64]) -> Vec<SSTable> {
        self.ensure_level(level);
        let bucket = std::mem::take(&mut self.levels[level as usize]);
        let (removed, kept): (Vec<SSTable>, Vec<SSTable>) =
            bucket.into_iter().partition(|t| ids.contains(&t.id));
        self.levels[level as usize] = kept;
        removed
    }

    pub fn clear(&mut self, level: u32) {
        self.ensure_level(level);
        self.levels[level as usize].clear();
    }

    pub fn clear_all(&mut self) {
        self.levels.clear();
        self.next_id = 0;
    }

    pub fn level_count(&self, level: u32) -> usize {
        self.get_level(level).len()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn highest_populated_level(&self) -> Option<u32> {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| !b.is_empty())
            .map(|(i, _)| i as u32)
    }

    pub fn total_tables(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn total_estimated_bytes(&self) -> u64 {
        self.levels
            .iter()
            .flat_map(|b| b.iter())
            .map(SSTable::estimated_bytes)
            .sum()
    }

    /// Per-level search per the spec: L0 scanned newest-first, L>=1 scanned in
    /// insertion order after range-skipping tables that cannot contain `key`.
    pub fn search(&self, key: &[u8]) -> ManagerLookup {
        let mut path = Vec::new();

        for (level_idx, bucket) in self.levels.iter().enumerate() {
            let level = level_idx as u32;
            let ordered: Box<dyn Iterator<Item = &SSTable>> = if level == 0 {
                Box::new(bucket.iter().rev())
            } else {
                Box::new(bucket.iter())
            };

            for table in ordered {
                if level > 0 && !table.contains_in_range(key) {
                    continue;
                }
                match table.get(key) {
                    Lookup::Hit(value) => {
                        path.push(SearchStep {
                            level,
                            table_id: table.id,
                            hit: true,
                            bloom_saved: false,
                        });
                        return ManagerLookup::Hit { value, path };
                    }
                    Lookup::Miss { bloom_saved } => {
                        path.push(SearchStep {
                            level,
                            table_id: table.id,
                            hit: false,
                            bloom_saved,
                        });
                    }
                }
            }
        }

        ManagerLookup::Miss { path }
    }
}
