//! Immutable, sorted, key-indexed tables produced by memtable flush or compaction.
//!
//! # Layout (in memory)
//!
//! An `SSTable` holds its records in a single `Vec<Record>` sorted strictly ascending
//! by key, alongside:
//!
//! - a [`BloomFilter`](crate::bloom::BloomFilter) over the key set, sized for the
//!   record count at a configurable target false-positive rate;
//! - a sparse index recording every `sparse_index_step`-th key (plus the final key),
//!   used to narrow a lookup to a small binary-search window before touching the
//!   record vector directly;
//! - range metadata (`min_key`, `max_key`) used by the [`crate::manager`] to skip
//!   tables that cannot possibly contain a queried key.
//!
//! There is no on-disk format here — the spec this engine implements models the
//! "disk" as heap-resident immutable tables, so there is nothing analogous to the
//! block/footer/checksum layout a persistent SSTable would need.

use crate::bloom::BloomFilter;
use crate::{Record, Value};

/// Failure modes for SSTable construction. Reads are total and never fail.
#[derive(Debug, thiserror::Error)]
pub enum SSTableError {
    #[error("cannot build an SSTable from zero records")]
    EmptyInput,
    #[error("invariant violation: records are not strictly ordered by key after sort")]
    NotSorted,
}

/// One entry in the sparse index: a key and the position of its record in the
/// backing `Vec`.
#[derive(Debug, Clone)]
struct IndexEntry {
    key: Vec<u8>,
    pos: usize,
}

/// Outcome of [`SSTable::get`], distinguishing a bloom-filter-elided miss from a
/// miss that required an actual index/binary-search probe — used by the facade to
/// report `bloom_saved` in the search path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(Value),
    Miss { bloom_saved: bool },
}

/// An immutable sorted table of records.
#[derive(Debug)]
pub struct SSTable {
    pub id: u64,
    pub level: u32,
    records: Vec<Record>,
    index: Vec<IndexEntry>,
    bloom: BloomFilter,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub created_seq: u64,
}

impl SSTable {
    /// Builds a table from `records`. `records` is sorted defensively if not already
    /// ordered (memtable flush supplies sorted input; compaction's merge output is
    /// also already ordered, but we do not assume callers uphold that).
    pub fn build(
        id: u64,
        level: u32,
        mut records: Vec<Record>,
        sparse_index_step: usize,
        bloom_target_fpr: f64,
        created_seq: u64,
    ) -> Result<Self, SSTableError> {
        if records.is_empty() {
            return Err(SSTableError::EmptyInput);
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        for w in records.windows(2) {
            if w[0].key >= w[1].key {
                return Err(SSTableError::NotSorted);
            }
        }

        let mut bloom = BloomFilter::new(records.len(), bloom_target_fpr);
        for r in &records {
            bloom.add(&r.key);
        }

        let step = sparse_index_step.max(1);
        let mut index = Vec::new();
        for (pos, r) in records.iter().enumerate() {
            if pos % step == 0 {
                index.push(IndexEntry {
                    key: r.key.clone(),
                    pos,
                });
            }
        }
        let last = records.len() - 1;
        if index.last().map(|e| e.pos) != Some(last) {
            index.push(IndexEntry {
                key: records[last].key.clone(),
                pos: last,
            });
        }

        let min_key = records[0].key.clone();
        let max_key = records[last].key.clone();

        tracing::trace!(
            id,
            level,
            records = records.len(),
            index_entries = index.len(),
            "built sstable"
        );

        Ok(SSTable {
            id,
            level,
            records,
            index,
            bloom,
            min_key,
            max_key,
            created_seq,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_in_range(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Bloom check -> sparse-index interval -> binary search, per the spec's lookup
    /// protocol.
    pub fn get(&self, key: &[u8]) -> Lookup {
        if self.bloom.contains(key).is_definitely_absent() {
            return Lookup::Miss { bloom_saved: true };
        }

        let (lo, hi) = self.index_bounds(key);
        match self.records[lo..hi].binary_search_by(|r| r.key.as_slice().cmp(key)) {
            Ok(rel) => Lookup::Hit(self.records[lo + rel].value.clone()),
            Err(_) => Lookup::Miss { bloom_saved: false },
        }
    }

    /// Narrows `key` to a `[lo, hi)` slice of `self.records` using the sparse index.
    fn index_bounds(&self, key: &[u8]) -> (usize, usize) {
        // Find the last index entry whose key <= target.
        let mut lo_entry = 0usize;
        for (i, e) in self.index.iter().enumerate() {
            if e.key.as_slice() <= key {
                lo_entry = i;
            } else {
                break;
            }
        }
        let lo = self.index[lo_entry].pos;
        let hi = self
            .index
            .get(lo_entry + 1)
            .map(|e| e.pos)
            .unwrap_or(self.records.len());
        (lo, hi)
    }

    /// Linear scan from the first key >= `lo` to the last key <= `hi`.
    pub fn scan(&self, lo: &[u8], hi: &[u8]) -> Vec<Record> {
        let start = self.records.partition_point(|r| r.key.as_slice() < lo);
        self.records[start..]
            .iter()
            .take_while(|r| r.key.as_slice() <= hi)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn bloom_stats(&self) -> crate::bloom::BloomStats {
        self.bloom.stats()
    }

    /// Estimated byte footprint, used for write-amplification accounting. There is no
    /// real serialization to measure, so this is a fixed-overhead estimate per record.
    pub fn estimated_bytes(&self) -> u64 {
        const PER_RECORD_OVERHEAD: u64 = 24;
        self.records
            .iter()
            .map(|r| {
                let val_len = match &r.value {
                    Value::Bytes(b) => b.len() as u64,
                    Value::Tombstone => 0,
                };
                r.key.len() as u64 + val_len + PER_RECORD_OVERHEAD
            })
            .sum()
    }
}
