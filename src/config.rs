//! Engine configuration. A single struct, constructible via [`Default`] and overridable
//! field-by-field with struct-update syntax, mirroring the pack's `EngineConfig`
//! convention.

use crate::compaction::CompactionThresholds;

/// Tuning knobs recognized by [`crate::engine::LsmTree::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Flush the memtable to a new L0 SSTable once it holds this many records.
    pub memtable_threshold: usize,
    /// Skip list level ceiling.
    pub max_skip_list_level: usize,
    /// Skip list level-promotion probability.
    pub skip_list_promotion_p: f64,
    /// Record every Nth key in an SSTable's sparse index.
    pub sstable_sparse_index_step: usize,
    /// Target false-positive rate for each SSTable's bloom filter.
    pub bloom_filter_target_fpr: f64,
    /// Per-level table-count thresholds that trigger automatic compaction.
    pub level_compaction_thresholds: CompactionThresholds,
    /// Run the auto-compaction cascade after every write that triggers a flush.
    pub auto_compact: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            memtable_threshold: 10,
            max_skip_list_level: 16,
            skip_list_promotion_p: 0.5,
            sstable_sparse_index_step: 10,
            bloom_filter_target_fpr: 0.01,
            level_compaction_thresholds: CompactionThresholds::default(),
            auto_compact: true,
        }
    }
}
