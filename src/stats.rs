//! Aggregate statistics snapshot, returned by [`crate::engine::LsmTree::stats`].

use crate::compaction::CompactionRecord;

#[derive(Debug, Clone, Default)]
pub struct OperationCounters {
    pub puts: u64,
    pub deletes: u64,
    pub gets: u64,
    pub flushes: u64,
    pub compactions: u64,
}

#[derive(Debug, Clone)]
pub struct LevelStats {
    pub level: u32,
    pub table_count: usize,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub counters: OperationCounters,
    pub memtable_len: usize,
    pub memtable_height: usize,
    pub memtable_estimated_bytes: usize,
    pub levels: Vec<LevelStats>,
    pub total_sstable_count: usize,
    pub total_sstable_bytes: u64,
    pub compaction_count: usize,
    /// Last few entries of the compaction history log, newest last.
    pub recent_compactions: Vec<CompactionRecord>,
    /// Cumulative output bytes / cumulative input bytes across every compaction since
    /// engine creation. Monotonic non-decreasing in the input size sense described in
    /// the engine's design notes; see `CompactionRecord::write_amplification` for the
    /// per-compaction figure.
    pub write_amplification: f64,
}
