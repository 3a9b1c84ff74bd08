//! Synchronous observer events, delivered from the engine's four named channels
//! (`on_memtable_insert`, `on_memtable_flush`, `on_read`, `on_compaction`) after the
//! engine state has been updated and before the triggering call returns.
//!
//! Observers are plain trait objects, not a generic pub/sub bus — the engine is
//! single-threaded and there is no need for anything heavier.

use crate::compaction::CompactionRecord;
use crate::manager::SearchStep;
use crate::skiplist::InsertOutcome;

#[derive(Debug, Clone)]
pub struct MemtableInsertEvent {
    pub key: Vec<u8>,
    pub outcome: InsertOutcome,
    pub is_delete: bool,
    pub memtable_len: usize,
}

#[derive(Debug, Clone)]
pub struct MemtableFlushEvent {
    pub sstable_id: u64,
    pub record_count: usize,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ReadEvent {
    pub key: Vec<u8>,
    pub hit: bool,
    pub search_path: Vec<SearchStep>,
}

#[derive(Debug, Clone)]
pub struct CompactionEvent {
    pub record: CompactionRecord,
}

/// An observer callback, invoked synchronously. A panic inside the callback is caught
/// at the call site and logged as an `ObserverError`; it never propagates into the
/// triggering operation.
pub type Observer<E> = Box<dyn Fn(&E) + Send + Sync>;

#[derive(Default)]
pub struct Observers {
    pub on_memtable_insert: Option<Observer<MemtableInsertEvent>>,
    pub on_memtable_flush: Option<Observer<MemtableFlushEvent>>,
    pub on_read: Option<Observer<ReadEvent>>,
    pub on_compaction: Option<Observer<CompactionEvent>>,
}

impl Observers {
    /// Invokes `observer` with `event`, quarantining a panic as a logged
    /// `ObserverError` rather than letting it unwind into the caller.
    pub fn fire<E>(observer: &Option<Observer<E>>, event: &E) {
        let Some(cb) = observer else { return };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(event)));
        if result.is_err() {
            tracing::error!("observer callback panicked; event delivery aborted for this channel");
        }
    }
}
