//! Storage Engine Module
//!
//! The keyspace of livekv: a thread-safe, sharded key-value store with typed
//! values, TTL support and a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │──> ExpiryListener
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use livekv::storage::{StorageEngine, Value};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("session"), Value::from("token123"), Some(Duration::from_secs(3600)));
//! assert_eq!(engine.exists(&[Bytes::from("session"), Bytes::from("other")]), 1);
//! ```

pub mod engine;
pub mod expiry;
pub mod value;

pub use engine::{
    Entry, ExpiryUpdate, NumericOp, PurgeOutcome, SetCondition, SetOptions, StorageEngine,
    StorageError, StorageStats, Ttl,
};
pub use expiry::{ExpiryConfig, ExpiryListener, ExpirySweeper};
pub use value::{Value, ValueKind};
