//! `lsmkv` — a single-node, in-process LSM-tree key-value storage engine.
//!
//! ```text
//!                         ┌─────────────────────┐
//!   put/get/delete  ───▶  │      LsmTree         │  ◀─── stats / observers
//!                         │  (engine::LsmTree)   │
//!                         └──────────┬───────────┘
//!                                    │
//!                  ┌─────────────────┼─────────────────┐
//!                  ▼                 ▼                 ▼
//!          ┌───────────────┐ ┌───────────────┐ ┌────────────────┐
//!          │   SkipList    │ │ SSTableManager│ │ compaction::    │
//!          │  (memtable)   │ │  (L0, L1, …)  │ │ leveled merge   │
//!          └───────────────┘ └───────┬───────┘ └────────────────┘
//!                                    ▼
//!                            ┌───────────────┐
//!                            │    SSTable    │
//!                            │ bloom + index │
//!                            └───────────────┘
//! ```
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`bloom`] | Probabilistic membership test embedded in every SSTable |
//! | [`skiplist`] | Ordered in-memory write buffer (the memtable) |
//! | [`sstable`] | Immutable sorted record table with bloom + sparse index |
//! | [`manager`] | Per-level SSTable storage and lookup |
//! | [`compaction`] | Leveled k-way merge, dedup, tombstone drop, write-amp accounting |
//! | [`engine`] | [`engine::LsmTree`] facade: put/get/delete/compact/stats/observers |
//!
//! There is no durability, crash recovery, write-ahead log, or on-disk format in this
//! engine: SSTables are heap-resident for the lifetime of the process, and a single
//! logical caller drives every operation to completion before the next one begins.
//!
//! # Quick start
//!
//! ```
//! use lsmkv::{EngineConfig, LsmTree};
//!
//! let mut tree = LsmTree::new(EngineConfig::default());
//! tree.put(b"user1".to_vec(), b"alice".to_vec()).unwrap();
//! let found = tree.get(b"user1").unwrap();
//! assert_eq!(found.value.as_deref(), Some(b"alice".as_slice()));
//! ```

#![allow(dead_code)]

pub mod bloom;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod events;
pub mod manager;
pub mod skiplist;
pub mod sstable;
pub mod stats;

pub use config::EngineConfig;
pub use engine::LsmTree;

/// A stored value, or the sentinel that marks a key as deleted. Tombstones are
/// first-class records: they participate in ordering and recency exactly like a live
/// value until compaction drops them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Tombstone,
}

impl Value {
    pub fn as_deref(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            Value::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }
}

/// A single (key, value-or-tombstone, sequence) triple as it is stored in an SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Value,
    pub seq: u64,
}

/// Errors a caller of the public API can receive. Engine-internal module errors
/// (`sstable::SSTableError`, `compaction::CompactionError`) are folded in via `#[from]`;
/// `UsageError` and `PreconditionError` are caller-induced and leave engine state
/// unchanged; `Invariant` is fatal and poisons the engine (see [`engine::LsmTree`]).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("invariant violation: {0}")]
    Invariant(String),
    #[error(transparent)]
    SSTable(#[from] sstable::SSTableError),
    #[error(transparent)]
    Compaction(#[from] compaction::CompactionError),
    #[error(
        "engine is poisoned after a detected invariant violation and refuses further operations"
    )]
    Poisoned,
}

/// Malformed input from the caller. Reported without any state change.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("key must not be empty")]
    EmptyKey,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("expected an integer level, got {0:?}")]
    InvalidLevel(String),
}

/// A caller asked for an operation whose preconditions are not met. Reported without
/// any state change.
#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("level {0} has no SSTables to compact")]
    EmptySourceLevel(u32),
}
