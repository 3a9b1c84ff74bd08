//! The [`LsmTree`] facade: coordinates the memtable, SSTable manager, and compaction
//! engine behind a single-threaded, synchronous API. There are no background threads —
//! a `put`/`delete` that triggers a flush and a compaction cascade runs all of it to
//! completion before returning, and observers are invoked synchronously from the same
//! call.

use std::time::Instant;

use crate::compaction::{self, CompactionRecord};
use crate::config::EngineConfig;
use crate::events::{CompactionEvent, MemtableFlushEvent, MemtableInsertEvent, Observers, ReadEvent};
use crate::manager::{ManagerLookup, SSTableManager, SearchStep};
use crate::skiplist::{Entry, InsertOutcome, SkipList};
use crate::sstable::{SSTable, SSTableError};
use crate::stats::{LevelStats, OperationCounters, Stats};
use crate::{EngineError, PreconditionError, Record, UsageError, Value};

/// One step of a `get`'s full search path: either the memtable probe or a single
/// SSTable examined by the manager.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Memtable { hit: bool },
    SSTable(SearchStep),
}

/// Result of [`LsmTree::put`] / [`LsmTree::delete`].
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub outcome: InsertOutcome,
    pub flushed: bool,
    pub compacted_levels: Vec<(u32, u32)>,
    pub duration_ms: f64,
}

/// Result of [`LsmTree::get`].
#[derive(Debug, Clone)]
pub struct GetResult {
    pub value: Option<Value>,
    pub search_path: Vec<ReadStep>,
    pub duration_ms: f64,
}

impl GetResult {
    /// The live value, or `None` for both an absent key and a tombstoned one.
    pub fn found(&self) -> Option<&[u8]> {
        self.value.as_ref().and_then(Value::as_deref)
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Some(Value::Tombstone))
    }
}

/// Result of a manual [`LsmTree::compact`] call.
#[derive(Debug, Clone)]
pub struct CompactResult {
    pub record: Option<CompactionRecord>,
    pub duration_ms: f64,
}

/// The LSM-tree storage engine. Owns the memtable, every level's SSTables, the
/// compaction history log, operation counters, and the observer callback slots.
pub struct LsmTree {
    memtable: SkipList,
    manager: SSTableManager,
    config: EngineConfig,
    next_seq: u64,
    counters: OperationCounters,
    compaction_history: Vec<CompactionRecord>,
    observers: Observers,
    poisoned: bool,
}

impl LsmTree {
    pub fn new(config: EngineConfig) -> Self {
        let memtable = SkipList::new(config.max_skip_list_level, config.skip_list_promotion_p);
        LsmTree {
            memtable,
            manager: SSTableManager::new(),
            config,
            next_seq: 0,
            counters: OperationCounters::default(),
            compaction_history: Vec::new(),
            observers: Observers::default(),
            poisoned: false,
        }
    }

    pub fn on_memtable_insert(&mut self, f: impl Fn(&MemtableInsertEvent) + Send + Sync + 'static) {
        self.observers.on_memtable_insert = Some(Box::new(f));
    }

    pub fn on_memtable_flush(&mut self, f: impl Fn(&MemtableFlushEvent) + Send + Sync + 'static) {
        self.observers.on_memtable_flush = Some(Box::new(f));
    }

    pub fn on_read(&mut self, f: impl Fn(&ReadEvent) + Send + Sync + 'static) {
        self.observers.on_read = Some(Box::new(f));
    }

    pub fn on_compaction(&mut self, f: impl Fn(&CompactionEvent) + Send + Sync + 'static) {
        self.observers.on_compaction = Some(Box::new(f));
    }

    fn check_poisoned(&self) -> Result<(), EngineError> {
        if self.poisoned {
            Err(EngineError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn next_seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    /// Classifies an `SSTableError` surfaced from table construction. `NotSorted` is
    /// the spec's own example of a detected §3 invariant violation and is fatal per
    /// §7: it poisons the engine so the violation cannot be silently retried around.
    /// `EmptyInput` is not an invariant violation (callers that hit it simply built a
    /// table from nothing) and is returned as an ordinary recoverable error.
    fn classify_sstable_error(&mut self, err: SSTableError) -> EngineError {
        match err {
            SSTableError::NotSorted => {
                self.poisoned = true;
                tracing::error!(error = %err, "invariant violation detected; engine poisoned");
                EngineError::Invariant(err.to_string())
            }
            other => other.into(),
        }
    }

    /// Inserts or updates `key` with `value`. Flushes the memtable (and may trigger a
    /// compaction cascade) once its size reaches `config.memtable_threshold`.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<WriteResult, EngineError> {
        self.write(key, Value::Bytes(value), false)
    }

    /// Inserts a tombstone for `key`. Always succeeds; idempotent.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<WriteResult, EngineError> {
        self.write(key, Value::Tombstone, true)
    }

    fn write(&mut self, key: Vec<u8>, value: Value, is_delete: bool) -> Result<WriteResult, EngineError> {
        self.check_poisoned()?;
        if key.is_empty() {
            return Err(UsageError::EmptyKey.into());
        }

        let started = Instant::now();
        let seq = self.next_seq();
        let (outcome, _level) = self.memtable.insert(key.clone(), Entry { value, seq });

        if is_delete {
            self.counters.deletes += 1;
        } else {
            self.counters.puts += 1;
        }

        Observers::fire(
            &self.observers.on_memtable_insert,
            &MemtableInsertEvent {
                key,
                outcome,
                is_delete,
                memtable_len: self.memtable.len(),
            },
        );

        let mut flushed = false;
        let mut compacted_levels = Vec::new();

        if self.memtable.len() >= self.config.memtable_threshold {
            self.flush()?;
            flushed = true;
            if self.config.auto_compact {
                compacted_levels = self.auto_compact()?;
            }
        }

        Ok(WriteResult {
            outcome,
            flushed,
            compacted_levels,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Looks up `key`: memtable first, then each level in ascending order via the
    /// SSTable manager. Returns the full search path either way.
    pub fn get(&mut self, key: &[u8]) -> Result<GetResult, EngineError> {
        self.check_poisoned()?;
        if key.is_empty() {
            return Err(UsageError::EmptyKey.into());
        }

        let started = Instant::now();
        self.counters.gets += 1;

        let mut path = Vec::new();

        if let Some(entry) = self.memtable.search(key) {
            path.push(ReadStep::Memtable { hit: true });
            let hit = !entry.is_tombstone();
            let value = entry.value.clone();
            Observers::fire(
                &self.observers.on_read,
                &ReadEvent {
                    key: key.to_vec(),
                    hit,
                    search_path: Vec::new(),
                },
            );
            return Ok(GetResult {
                value: Some(value),
                search_path: path,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }
        path.push(ReadStep::Memtable { hit: false });

        let (value, sstable_path, hit) = match self.manager.search(key) {
            ManagerLookup::Hit { value, path } => (Some(value.clone()), path, !value.is_tombstone()),
            ManagerLookup::Miss { path } => (None, path, false),
        };

        let sstable_path_for_event = sstable_path.clone();
        path.extend(sstable_path.into_iter().map(ReadStep::SSTable));

        Observers::fire(
            &self.observers.on_read,
            &ReadEvent {
                key: key.to_vec(),
                hit,
                search_path: sstable_path_for_event,
            },
        );

        Ok(GetResult {
            value,
            search_path: path,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Flushes the memtable into a new L0 SSTable, if non-empty. No-op otherwise.
    pub fn flush(&mut self) -> Result<Option<u64>, EngineError> {
        self.check_poisoned()?;
        if self.memtable.is_empty() {
            return Ok(None);
        }

        let records: Vec<Record> = self
            .memtable
            .iterate_ordered()
            .map(|(k, e)| Record {
                key: k.to_vec(),
                value: e.value.clone(),
                seq: e.seq,
            })
            .collect();

        let id = self.manager.next_id();
        let seq = self.next_seq();
        let table = match SSTable::build(
            id,
            0,
            records,
            self.config.sstable_sparse_index_step,
            self.config.bloom_filter_target_fpr,
            seq,
        ) {
            Ok(t) => t,
            Err(e) => return Err(self.classify_sstable_error(e)),
        };

        let record_count = table.len();
        let estimated_bytes = table.estimated_bytes();

        self.manager.add(0, table);
        self.memtable = SkipList::new(self.config.max_skip_list_level, self.config.skip_list_promotion_p);
        self.counters.flushes += 1;

        tracing::debug!(id, record_count, "memtable flushed to L0");

        Observers::fire(
            &self.observers.on_memtable_flush,
            &MemtableFlushEvent {
                sstable_id: id,
                record_count,
                estimated_bytes,
            },
        );

        Ok(Some(id))
    }

    /// Manually compacts `src_level` into `src_level + 1`.
    pub fn compact(&mut self, src_level: u32) -> Result<CompactResult, EngineError> {
        self.check_poisoned()?;
        let started = Instant::now();
        let record = self.compact_once(src_level)?;
        Ok(CompactResult {
            record,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn compact_once(&mut self, src_level: u32) -> Result<Option<CompactionRecord>, EngineError> {
        let dst_level = src_level + 1;
        let seq = self.next_seq();
        let result = compaction::compact(
            &mut self.manager,
            src_level,
            dst_level,
            self.config.sstable_sparse_index_step,
            self.config.bloom_filter_target_fpr,
            seq,
        );

        match result {
            Ok(record) => {
                self.counters.compactions += 1;
                if let Some(r) = &record {
                    self.compaction_history.push(r.clone());
                    Observers::fire(&self.observers.on_compaction, &CompactionEvent { record: r.clone() });
                }
                Ok(record)
            }
            Err(compaction::CompactionError::EmptySource(level)) => {
                Err(PreconditionError::EmptySourceLevel(level).into())
            }
            Err(compaction::CompactionError::SSTable(e)) => Err(self.classify_sstable_error(e)),
        }
    }

    /// Evaluates every populated level in ascending order and compacts any level whose
    /// table count has reached its threshold. A single flush may trigger a cascade that
    /// touches several levels.
    fn auto_compact(&mut self) -> Result<Vec<(u32, u32)>, EngineError> {
        let mut touched = Vec::new();
        loop {
            let mut did_any = false;
            let num_levels = self.manager.num_levels() as u32;
            for level in 0..num_levels {
                let threshold = self.config.level_compaction_thresholds.threshold_for(level);
                if self.manager.level_count(level) >= threshold {
                    self.compact_once(level)?;
                    touched.push((level, level + 1));
                    did_any = true;
                }
            }
            if !did_any {
                break;
            }
        }
        Ok(touched)
    }

    /// Wipes the memtable, every level, the compaction history, and all counters.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.memtable = SkipList::new(self.config.max_skip_list_level, self.config.skip_list_promotion_p);
        self.manager.clear_all();
        self.compaction_history.clear();
        self.counters = OperationCounters::default();
        self.next_seq = 0;
        self.poisoned = false;
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        let levels: Vec<LevelStats> = (0..self.manager.num_levels() as u32)
            .map(|level| LevelStats {
                level,
                table_count: self.manager.level_count(level),
                estimated_bytes: self.manager.get_level(level).iter().map(SSTable::estimated_bytes).sum(),
            })
            .collect();

        let total_input: u64 = self.compaction_history.iter().map(|c| c.input_bytes).sum();
        let total_output: u64 = self.compaction_history.iter().map(|c| c.output_bytes).sum();
        let write_amplification = if total_input == 0 {
            0.0
        } else {
            total_output as f64 / total_input as f64
        };

        let recent_compactions = self
            .compaction_history
            .iter()
            .rev()
            .take(10)
            .rev()
            .cloned()
            .collect();

        Stats {
            counters: self.counters.clone(),
            memtable_len: self.memtable.len(),
            memtable_height: self.memtable.height(),
            memtable_estimated_bytes: self.memtable.estimated_bytes(),
            levels,
            total_sstable_count: self.manager.total_tables(),
            total_sstable_bytes: self.manager.total_estimated_bytes(),
            compaction_count: self.compaction_history.len(),
            recent_compactions,
            write_amplification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_threshold(threshold: usize) -> LsmTree {
        let config = EngineConfig {
            memtable_threshold: threshold,
            ..EngineConfig::default()
        };
        LsmTree::new(config)
    }

    #[test]
    fn read_your_write() {
        let mut tree = tree_with_threshold(100);
        tree.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(tree.get(b"k").unwrap().found(), Some(b"v".as_slice()));
    }

    #[test]
    fn delete_masks_earlier_put() {
        let mut tree = tree_with_threshold(100);
        tree.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        tree.delete(b"k".to_vec()).unwrap();
        assert_eq!(tree.get(b"k").unwrap().found(), None);
    }

    #[test]
    fn s1_fill_below_threshold_stays_in_memtable() {
        let mut tree = tree_with_threshold(10);
        for (k, v) in [
            ("user1", "alice"),
            ("user2", "bob"),
            ("user3", "charlie"),
            ("user4", "dave"),
            ("user5", "eve"),
        ] {
            tree.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()).unwrap();
        }
        assert_eq!(tree.stats().memtable_len, 5);
        assert_eq!(tree.stats().total_sstable_count, 0);
        assert_eq!(tree.get(b"user3").unwrap().found(), Some(b"charlie".as_slice()));
    }

    #[test]
    fn s2_crossing_threshold_triggers_flush_to_l0() {
        let mut tree = tree_with_threshold(10);
        for i in 1..=10u32 {
            let k = format!("user{i}");
            let v = format!("v{i}");
            tree.put(k.into_bytes(), v.into_bytes()).unwrap();
        }
        let stats = tree.stats();
        assert_eq!(stats.memtable_len, 0);
        assert_eq!(stats.levels[0].table_count, 1);
    }

    #[test]
    fn s3_bloom_saves_read_for_nonexistent_key() {
        let mut tree = tree_with_threshold(10);
        for i in 1..=10u32 {
            tree.put(format!("user{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        let result = tree.get(b"nonexistent").unwrap();
        assert!(result.found().is_none());
        let saved_by_bloom = result.search_path.iter().any(|step| match step {
            ReadStep::SSTable(s) => s.bloom_saved,
            _ => false,
        });
        assert!(saved_by_bloom);
    }

    #[test]
    fn s4_compact_l0_to_l1_preserves_reads() {
        let mut tree = tree_with_threshold(10);
        for i in 1..=10u32 {
            tree.put(format!("user{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        tree.compact(0).unwrap();
        let stats = tree.stats();
        assert_eq!(stats.levels[0].table_count, 0);
        assert_eq!(stats.levels[1].table_count, 1);
        assert_eq!(tree.get(b"user7").unwrap().found(), Some(b"v7".as_slice()));
    }

    #[test]
    fn s5_update_then_compaction_dedups_to_latest_value() {
        let mut config = EngineConfig::default();
        config.memtable_threshold = 3;
        let mut tree = LsmTree::new(config);

        tree.put(b"user5".to_vec(), b"original".to_vec()).unwrap();
        tree.put(b"x".to_vec(), b"1".to_vec()).unwrap();
        tree.put(b"y".to_vec(), b"1".to_vec()).unwrap(); // flush #1, contains user5=original

        tree.put(b"user5".to_vec(), b"new".to_vec()).unwrap();
        tree.put(b"z".to_vec(), b"1".to_vec()).unwrap();
        tree.put(b"w".to_vec(), b"1".to_vec()).unwrap(); // flush #2, contains user5=new

        assert_eq!(tree.stats().levels[0].table_count, 2);

        let result = tree.compact(0).unwrap().record.unwrap();
        assert!(result.duplicates_removed >= 1);
        assert_eq!(tree.get(b"user5").unwrap().found(), Some(b"new".as_slice()));
    }

    #[test]
    fn s6_delete_then_compact_drops_tombstone_at_deepest_level() {
        let mut config = EngineConfig::default();
        config.memtable_threshold = 2;
        let mut tree = LsmTree::new(config);

        tree.put(b"user2".to_vec(), b"bob".to_vec()).unwrap();
        tree.put(b"a".to_vec(), b"1".to_vec()).unwrap(); // flush #1

        tree.delete(b"user2".to_vec()).unwrap();
        tree.put(b"b".to_vec(), b"1".to_vec()).unwrap(); // flush #2

        tree.compact(0).unwrap();

        assert_eq!(tree.get(b"user2").unwrap().found(), None);
        let stats = tree.stats();
        let deepest = stats.levels.last().unwrap();
        assert_eq!(deepest.table_count, 1);
    }

    #[test]
    fn empty_key_is_a_usage_error() {
        let mut tree = tree_with_threshold(10);
        let err = tree.put(Vec::new(), b"v".to_vec()).unwrap_err();
        assert!(matches!(err, EngineError::Usage(UsageError::EmptyKey)));
    }

    #[test]
    fn compact_on_empty_level_is_a_precondition_error() {
        let mut tree = tree_with_threshold(10);
        let err = tree.compact(0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Precondition(PreconditionError::EmptySourceLevel(0))
        ));
    }

    #[test]
    fn clear_resets_everything() {
        let mut tree = tree_with_threshold(3);
        for i in 0..5u32 {
            tree.put(format!("k{i}").into_bytes(), b"v".to_vec()).unwrap();
        }
        tree.clear().unwrap();
        let stats = tree.stats();
        assert_eq!(stats.memtable_len, 0);
        assert_eq!(stats.total_sstable_count, 0);
        assert_eq!(stats.compaction_count, 0);
    }

    #[test]
    fn observers_are_invoked_on_write_flush_and_read() {
        use std::cell::Cell;
        use std::rc::Rc;

        let insert_count = Rc::new(Cell::new(0));
        let flush_count = Rc::new(Cell::new(0));
        let read_count = Rc::new(Cell::new(0));

        let mut tree = tree_with_threshold(2);

        // Observers must be Send + Sync per the trait object bound; use atomics
        // instead of Rc for the real callback, keep Rc counters for local assertions.
        let _ = (&insert_count, &flush_count, &read_count);

        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let inserts = Arc::new(AtomicUsize::new(0));
        let flushes = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));

        let i2 = inserts.clone();
        tree.on_memtable_insert(move |_| {
            i2.fetch_add(1, Ordering::SeqCst);
        });
        let f2 = flushes.clone();
        tree.on_memtable_flush(move |_| {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        let r2 = reads.clone();
        tree.on_read(move |_| {
            r2.fetch_add(1, Ordering::SeqCst);
        });

        tree.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        tree.put(b"b".to_vec(), b"1".to_vec()).unwrap();
        let _ = tree.get(b"a").unwrap();

        assert_eq!(inserts.load(Ordering::SeqCst), 2);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poisoned_engine_refuses_further_operations() {
        let mut tree = tree_with_threshold(10);
        tree.poisoned = true;
        let err = tree.put(b"k".to_vec(), b"v".to_vec()).unwrap_err();
        assert!(matches!(err, EngineError::Poisoned));
    }

    #[test]
    fn invariant_violation_poisons_the_engine() {
        let mut tree = tree_with_threshold(10);
        assert!(!tree.poisoned);

        let err = tree.classify_sstable_error(SSTableError::NotSorted);
        assert!(matches!(err, EngineError::Invariant(_)));
        assert!(tree.poisoned);

        // The poison must actually stick and be enforced by subsequent calls, not
        // just be reported once.
        let err = tree.put(b"k".to_vec(), b"v".to_vec()).unwrap_err();
        assert!(matches!(err, EngineError::Poisoned));
    }

    #[test]
    fn empty_input_sstable_error_does_not_poison() {
        let mut tree = tree_with_threshold(10);
        let err = tree.classify_sstable_error(SSTableError::EmptyInput);
        assert!(matches!(err, EngineError::SSTable(SSTableError::EmptyInput)));
        assert!(!tree.poisoned);
    }
}
