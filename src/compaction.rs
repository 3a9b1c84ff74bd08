//! Leveled compaction: merges the SSTables of one level into the next, deduplicating
//! by recency and dropping tombstones once they can no longer shadow anything deeper.
//!
//! The merge step is a k-way merge over a min-heap, the same shape the pack's
//! write-ahead-log-replay merge uses for recency-ordered record streams, adapted here
//! so that the heap orders by `(key, source_rank)` instead of `(key, lsn)`: level is the
//! major recency key (lower level is newer) and, within L0, later-inserted tables are
//! newer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::manager::SSTableManager;
use crate::sstable::{SSTable, SSTableError};
use crate::{Record, Value};

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("cannot compact level {0}: no source tables present")]
    EmptySource(u32),
    #[error(transparent)]
    SSTable(#[from] SSTableError),
}

/// Per-level population thresholds that trigger an automatic compaction cascade.
#[derive(Debug, Clone)]
pub struct CompactionThresholds {
    pub l0: usize,
    pub l1: usize,
    pub l2: usize,
    pub deeper: usize,
}

impl Default for CompactionThresholds {
    fn default() -> Self {
        CompactionThresholds {
            l0: 4,
            l1: 10,
            l2: 100,
            deeper: 1000,
        }
    }
}

impl CompactionThresholds {
    pub fn threshold_for(&self, level: u32) -> usize {
        match level {
            0 => self.l0,
            1 => self.l1,
            2 => self.l2,
            _ => self.deeper,
        }
    }
}

/// One entry in the compaction history log, returned to callers and retained on the
/// engine for `STATS` reporting.
#[derive(Debug, Clone)]
pub struct CompactionRecord {
    pub source_level: u32,
    pub target_level: u32,
    pub source_table_count: usize,
    pub overlapping_target_count: usize,
    pub output_record_count: usize,
    pub duplicates_removed: usize,
    pub tombstones_dropped: usize,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub wall_time_ms: f64,
}

impl CompactionRecord {
    /// Per-compaction write-amplification ratio. Not monotonic on its own — see
    /// `Stats::write_amplification` for the cumulative figure used for thresholding.
    pub fn write_amplification(&self) -> f64 {
        if self.input_bytes == 0 {
            0.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

struct MergeSource<'a> {
    records: std::slice::Iter<'a, Record>,
    /// Lower rank = newer. Major key is level, minor key is negative table id (so a
    /// later-inserted L0 table, which has a higher id, ranks as newer).
    rank: i64,
}

struct HeapEntry {
    key: Vec<u8>,
    record: Record,
    rank: i64,
    source_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.rank == other.rank
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (key asc, rank asc): BinaryHeap is a max-heap, so reverse.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.rank.cmp(&self.rank))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Iterates a set of already-sorted record streams in combined key order, newest
/// record first among ties, via a min-heap keyed by `(key, rank)`.
struct MergeIterator<'a> {
    sources: Vec<MergeSource<'a>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeIterator<'a> {
    fn new(mut sources: Vec<MergeSource<'a>>) -> Self {
        let mut heap = BinaryHeap::new();
        for (idx, src) in sources.iter_mut().enumerate() {
            if let Some(r) = src.records.next() {
                heap.push(HeapEntry {
                    key: r.key.clone(),
                    record: r.clone(),
                    rank: src.rank,
                    source_idx: idx,
                });
            }
        }
        MergeIterator { sources, heap }
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let top = self.heap.pop()?;
        if let Some(r) = self.sources[top.source_idx].records.next() {
            self.heap.push(HeapEntry {
                key: r.key.clone(),
                record: r.clone(),
                rank: self.sources[top.source_idx].rank,
                source_idx: top.source_idx,
            });
        }
        Some(top.record)
    }
}

/// Runs one leveled compaction of `src_level` into `dst_level`.
///
/// Merges every table currently at `src_level` with every table at `dst_level` whose
/// range overlaps the union range of the source tables, deduplicates by recency
/// (keeping the first/newest record in each equal-key run), drops tombstones when
/// `dst_level` is the highest level that will remain populated after this compaction,
/// and atomically replaces the consumed tables with a single new table at `dst_level`.
pub fn compact(
    manager: &mut SSTableManager,
    src_level: u32,
    dst_level: u32,
    sparse_index_step: usize,
    bloom_target_fpr: f64,
    created_seq: u64,
) -> Result<Option<CompactionRecord>, CompactionError> {
    let started = Instant::now();

    let src_tables = manager.take_level(src_level);
    if src_tables.is_empty() {
        return Err(CompactionError::EmptySource(src_level));
    }

    let (min_key, max_key) = union_range(&src_tables);

    let dst_all = manager.get_level(dst_level);
    let overlap_ids: Vec<u64> = dst_all
        .iter()
        .filter(|t| ranges_overlap(&min_key, &max_key, &t.min_key, &t.max_key))
        .map(|t| t.id)
        .collect();
    let overlapping_target_count = overlap_ids.len();
    let dst_tables = manager.take_matching(dst_level, &overlap_ids);

    let input_bytes: u64 = src_tables
        .iter()
        .chain(dst_tables.iter())
        .map(SSTable::estimated_bytes)
        .sum();

    // Rank: level is the major key (lower = newer); within a level, a later-inserted
    // table (higher id) is newer. Source-level tables always outrank target-level
    // tables because src_level < dst_level.
    let src_owned: Vec<Vec<Record>> = src_tables.iter().map(|t| t.iter().cloned().collect()).collect();
    let dst_owned: Vec<Vec<Record>> = dst_tables.iter().map(|t| t.iter().cloned().collect()).collect();

    let mut merge_sources = Vec::new();
    for (i, t) in src_tables.iter().enumerate() {
        merge_sources.push(MergeSource {
            records: src_owned[i].iter(),
            rank: rank_for(src_level, t.id),
        });
    }
    for (i, t) in dst_tables.iter().enumerate() {
        merge_sources.push(MergeSource {
            records: dst_owned[i].iter(),
            rank: rank_for(dst_level, t.id),
        });
    }

    let merged = MergeIterator::new(merge_sources);

    let highest_after = manager
        .highest_populated_level()
        .map(|h| h.max(dst_level))
        .unwrap_or(dst_level);
    let drop_tombstones = dst_level >= highest_after;

    let mut output = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;
    let mut duplicates_removed = 0usize;
    let mut tombstones_dropped = 0usize;

    for record in merged {
        if last_key.as_deref() == Some(record.key.as_slice()) {
            duplicates_removed += 1;
            continue;
        }
        last_key = Some(record.key.clone());
        if drop_tombstones && matches!(record.value, Value::Tombstone) {
            tombstones_dropped += 1;
            continue;
        }
        output.push(record);
    }

    let output_bytes: u64 = output
        .iter()
        .map(|r| {
            let val_len = match &r.value {
                Value::Bytes(b) => b.len() as u64,
                Value::Tombstone => 0,
            };
            r.key.len() as u64 + val_len + 24
        })
        .sum();
    let output_record_count = output.len();

    if !output.is_empty() {
        let id = manager.next_id();
        let table = SSTable::build(id, dst_level, output, sparse_index_step, bloom_target_fpr, created_seq)?;
        manager.add(dst_level, table);
    }

    let wall_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    tracing::info!(
        src_level,
        dst_level,
        source_tables = src_tables.len(),
        overlapping_target_count,
        output_record_count,
        duplicates_removed,
        tombstones_dropped,
        "compaction complete"
    );

    Ok(Some(CompactionRecord {
        source_level: src_level,
        target_level: dst_level,
        source_table_count: src_tables.len(),
        overlapping_target_count,
        output_record_count,
        duplicates_removed,
        tombstones_dropped,
        input_bytes,
        output_bytes,
        wall_time_ms,
    }))
}

fn rank_for(level: u32, table_id: u64) -> i64 {
    // Lower rank = newer. Major key: level ascending (lower level is newer).
    // Minor key: within a level, higher table id is newer, so negate it.
    (level as i64) * 10_000_000_000 - table_id as i64
}

fn union_range(tables: &[SSTable]) -> (Vec<u8>, Vec<u8>) {
    let min = tables.iter().map(|t| t.min_key.clone()).min().unwrap();
    let max = tables.iter().map(|t| t.max_key.clone()).max().unwrap();
    (min, max)
}

fn ranges_overlap(a_min: &[u8], a_max: &[u8], b_min: &[u8], b_max: &[u8]) -> bool {
    a_min <= b_max && b_min <= a_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;

    fn rec(k: &str, v: &str, seq: u64) -> Record {
        Record {
            key: k.as_bytes().to_vec(),
            value: Value::Bytes(v.as_bytes().to_vec()),
            seq,
        }
    }

    fn build(id: u64, level: u32, pairs: Vec<Record>) -> SSTable {
        SSTable::build(id, level, pairs, 10, 0.01, 0).unwrap()
    }

    #[test]
    fn compact_empty_source_fails() {
        let mut mgr = SSTableManager::new();
        let err = compact(&mut mgr, 0, 1, 10, 0.01, 0).unwrap_err();
        assert!(matches!(err, CompactionError::EmptySource(0)));
    }

    #[test]
    fn compact_merges_and_moves_to_target_level() {
        let mut mgr = SSTableManager::new();
        mgr.add(0, build(0, 0, vec![rec("a", "1", 1), rec("b", "2", 2)]));

        let result = compact(&mut mgr, 0, 1, 10, 0.01, 1).unwrap().unwrap();
        assert_eq!(result.output_record_count, 2);
        assert_eq!(mgr.level_count(0), 0);
        assert_eq!(mgr.level_count(1), 1);
    }

    #[test]
    fn newer_source_record_wins_on_duplicate_key() {
        let mut mgr = SSTableManager::new();
        mgr.add(1, build(0, 1, vec![rec("a", "old", 1)]));
        mgr.add(0, build(1, 0, vec![rec("a", "new", 2)]));

        let result = compact(&mut mgr, 0, 1, 10, 0.01, 2).unwrap().unwrap();
        assert_eq!(result.duplicates_removed, 1);

        let level1 = mgr.get_level(1);
        assert_eq!(level1.len(), 1);
        assert_eq!(level1[0].get(b"a"), crate::sstable::Lookup::Hit(Value::Bytes(b"new".to_vec())));
    }

    #[test]
    fn tombstone_dropped_at_deepest_level_with_no_older_copy() {
        let mut mgr = SSTableManager::new();
        mgr.add(0, build(0, 0, vec![Record {
            key: b"a".to_vec(),
            value: Value::Tombstone,
            seq: 1,
        }]));

        let result = compact(&mut mgr, 0, 1, 10, 0.01, 1).unwrap().unwrap();
        assert_eq!(result.tombstones_dropped, 1);
        assert_eq!(result.output_record_count, 0);
        assert_eq!(mgr.level_count(1), 0, "an all-tombstone compaction produces no output table");
    }

    #[test]
    fn non_overlapping_target_tables_are_left_untouched() {
        let mut mgr = SSTableManager::new();
        mgr.add(1, build(0, 1, vec![rec("y", "1", 1), rec("z", "2", 2)]));
        mgr.add(0, build(1, 0, vec![rec("a", "3", 3)]));

        let result = compact(&mut mgr, 0, 1, 10, 0.01, 3).unwrap().unwrap();
        assert_eq!(result.overlapping_target_count, 0);
        assert_eq!(mgr.level_count(1), 2);
    }
}
