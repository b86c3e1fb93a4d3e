//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the keyspace for livekv: a sharded, concurrent
//! HashMap from key to [`Entry`] with per-key TTL.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over
//!    independent shards so unrelated keys never contend.
//! 2. **Per-key atomicity**: every read-modify-write (`mutate_numeric`,
//!    conditional `set_with`, `expire`) runs under its shard's write lock, so
//!    two commands on the same key never interleave.
//! 3. **Lazy expiry is authoritative**: readers treat an expired entry as absent
//!    (see [`crate::storage::expiry`]). Expired entries are only physically
//!    removed by writers that replace them and by the active sweeper, which is
//!    also what reports them to the change notifier.
//! 4. **FLUSHDB snapshot**: `flush` takes every shard's write lock before
//!    clearing anything, so no command observes a half-flushed keyspace.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::storage::expiry;
use crate::storage::value::{Value, ValueKind};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of shards for the storage engine.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

/// Failures of numeric read-modify-write operations.
///
/// On either error the stored value is left untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The stored value is not an integer-backed string.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// The result does not fit in a signed 64-bit integer.
    #[error("increment or decrement would overflow")]
    Overflow,
}

/// A stored value with its expiry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The actual value stored
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
    /// When this entry was written
    pub created_at: Instant,
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Value) -> Self {
        Self::with_deadline(value, None)
    }

    /// Creates a new entry that expires `ttl` from now.
    pub fn with_ttl(value: Value, ttl: Duration) -> Self {
        Self::with_deadline(value, Some(expiry::deadline_after(ttl)))
    }

    /// Creates a new entry with an absolute deadline.
    pub fn with_deadline(value: Value, expires_at: Option<Instant>) -> Self {
        Self {
            value,
            expires_at,
            created_at: Instant::now(),
        }
    }

    /// Returns the kind tag of the stored value.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        expiry::is_expired(self.expires_at, Instant::now())
    }

    /// Checks if this entry had expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        expiry::is_expired(self.expires_at, now)
    }
}

/// When a `SET` is allowed to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    /// Always write.
    #[default]
    Always,
    /// `NX`: only write if the key is absent.
    IfAbsent,
    /// `XX`: only write if the key is present.
    IfPresent,
}

/// What a `SET` does with the key's expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryUpdate {
    /// Drop any previous expiry; the key persists.
    #[default]
    Clear,
    /// `KEEPTTL`: keep the previous expiry, if any.
    Keep,
    /// `EX` / `PX`: expire after the given duration.
    After(Duration),
}

/// Options for [`StorageEngine::set_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: ExpiryUpdate,
}

/// A numeric read-modify-write.
///
/// Decrements are kept as subtraction rather than addition of a negated
/// amount, so `i64::MIN` never has to be negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    Add(i64),
    Sub(i64),
}

impl NumericOp {
    /// Applies the operation to `current`.
    pub fn apply(self, current: i64) -> Result<i64, StorageError> {
        match self {
            NumericOp::Add(delta) => current.checked_add(delta),
            // A decrement of i64::MIN is rejected outright: its magnitude has
            // no positive i64 counterpart.
            NumericOp::Sub(i64::MIN) => None,
            NumericOp::Sub(amount) => current.checked_sub(amount),
        }
        .ok_or(StorageError::Overflow)
    }
}

/// Remaining lifetime of a key, as reported by `TTL` / `PTTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist (or has expired).
    Missing,
    /// The key exists and has no expiry.
    Persistent,
    /// The key expires after this duration.
    Expires(Duration),
}

/// Result of one active-expiry pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Keys that were physically removed.
    pub expired: Vec<Bytes>,
    /// Shards skipped because they were busy; retried on the next pass.
    pub skipped_shards: usize,
}

/// A single shard containing a portion of the keyspace.
#[derive(Debug)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

/// The keyspace.
///
/// This struct is designed to be wrapped in an `Arc` and shared by the
/// command executor, the subscription engine and the expiry sweeper. It is
/// never a process-wide singleton; tests build as many as they like.
///
/// # Example
///
/// ```
/// use livekv::storage::{StorageEngine, Value};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Value::from("Ariz"), None);
/// assert_eq!(engine.get(&Bytes::from("name")), Some(Value::from("Ariz")));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,

    /// Physically present entries, expired-but-unpurged included
    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::new()).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Inserts or overwrites `key`.
    ///
    /// With `ttl`, the key expires at `now + ttl`; without it the key persists
    /// until removed. Returns `true` if no live entry existed before.
    pub fn set(&self, key: Bytes, value: Value, ttl: Option<Duration>) -> bool {
        let expiry = match ttl {
            Some(ttl) => ExpiryUpdate::After(ttl),
            None => ExpiryUpdate::Clear,
        };
        let options = SetOptions {
            condition: SetCondition::Always,
            expiry,
        };
        self.set_with(key, value, options)
            .map(|previous_live| !previous_live)
            .unwrap_or(false)
    }

    /// Conditional insert.
    ///
    /// Returns `None` if the condition was not met (nothing written), or
    /// `Some(previous_live)` telling whether a live entry was replaced.
    pub fn set_with(&self, key: Bytes, value: Value, options: SetOptions) -> Option<bool> {
        let shard = self.get_shard(&key);
        let mut data = shard.data.write();
        let now = Instant::now();

        let previous = data.get(&key).filter(|e| !e.is_expired_at(now));
        let previous_live = previous.is_some();

        match options.condition {
            SetCondition::IfAbsent if previous_live => return None,
            SetCondition::IfPresent if !previous_live => return None,
            _ => {}
        }

        let expires_at = match options.expiry {
            ExpiryUpdate::Clear => None,
            ExpiryUpdate::Keep => previous.and_then(|e| e.expires_at),
            ExpiryUpdate::After(ttl) => Some(expiry::deadline_after(ttl)),
        };

        self.set_count.fetch_add(1, Ordering::Relaxed);
        if data.insert(key, Entry::with_deadline(value, expires_at)).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        Some(previous_live)
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get(&self, key: &Bytes) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Gets the full entry for a key, including metadata.
    pub fn get_entry(&self, key: &Bytes) -> Option<Entry> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let data = self.get_shard(key).data.read();
        data.get(key).filter(|e| !e.is_expired()).cloned()
    }

    /// Removes every listed key that is present and not expired.
    ///
    /// Returns the keys actually removed, in input order; the DEL count is
    /// its length. A key listed twice is removed (and counted) once.
    pub fn delete(&self, keys: &[Bytes]) -> Vec<Bytes> {
        let mut removed = Vec::new();

        for key in keys {
            self.del_count.fetch_add(1, Ordering::Relaxed);

            let mut data = self.get_shard(key).data.write();
            let live = data.get(key).is_some_and(|e| !e.is_expired());
            if live {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                removed.push(key.clone());
            }
        }

        removed
    }

    /// Counts how many of the listed keys are present and not expired.
    ///
    /// Each position is checked independently, so a key listed N times
    /// contributes N when it is live.
    pub fn exists(&self, keys: &[Bytes]) -> u64 {
        keys.iter().filter(|key| self.contains(key)).count() as u64
    }

    /// Checks if a single key is present and not expired.
    pub fn contains(&self, key: &Bytes) -> bool {
        let data = self.get_shard(key).data.read();
        data.get(key).is_some_and(|e| !e.is_expired())
    }

    /// Atomically applies a numeric operation to `key`.
    ///
    /// A missing or expired key counts as `0` and is created without expiry.
    /// An existing key keeps its expiry. On error nothing is written.
    pub fn mutate_numeric(&self, key: &Bytes, op: NumericOp) -> Result<i64, StorageError> {
        let mut data = self.get_shard(key).data.write();

        let live = data.get(key).filter(|e| !e.is_expired());
        let (current, expires_at) = match live {
            Some(entry) => (
                entry.value.as_integer().ok_or(StorageError::NotAnInteger)?,
                entry.expires_at,
            ),
            None => (0, None),
        };

        let updated = op.apply(current)?;

        self.set_count.fetch_add(1, Ordering::Relaxed);
        if data
            .insert(key.clone(), Entry::with_deadline(Value::Int(updated), expires_at))
            .is_none()
        {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(updated)
    }

    /// Sets an expiry on an existing key.
    ///
    /// Returns `true` if the key was live and now expires after `ttl`.
    pub fn expire(&self, key: &Bytes, ttl: Duration) -> bool {
        let mut data = self.get_shard(key).data.write();

        match data.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(expiry::deadline_after(ttl));
                true
            }
            _ => false,
        }
    }

    /// Removes the expiry from a key.
    ///
    /// Returns `true` only if the key was live and had an expiry.
    pub fn persist(&self, key: &Bytes) -> bool {
        let mut data = self.get_shard(key).data.write();

        match data.get_mut(key) {
            Some(entry) if !entry.is_expired() && entry.expires_at.is_some() => {
                entry.expires_at = None;
                true
            }
            _ => false,
        }
    }

    /// Returns the remaining lifetime of a key.
    pub fn ttl(&self, key: &Bytes) -> Ttl {
        let now = Instant::now();
        let data = self.get_shard(key).data.read();

        match data.get(key) {
            Some(entry) if !entry.is_expired_at(now) => match entry.expires_at {
                Some(deadline) => Ttl::Expires(deadline.saturating_duration_since(now)),
                None => Ttl::Persistent,
            },
            _ => Ttl::Missing,
        }
    }

    /// Returns the kind of a live key.
    pub fn kind(&self, key: &Bytes) -> Option<ValueKind> {
        let data = self.get_shard(key).data.read();
        data.get(key).filter(|e| !e.is_expired()).map(Entry::kind)
    }

    /// Clears the whole keyspace.
    ///
    /// All shard locks are held together, so the flush is a single
    /// consistent cut. Returns the number of live keys that were removed.
    pub fn flush(&self) -> usize {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.data.write()).collect();
        let now = Instant::now();

        let mut live = 0;
        for data in guards.iter_mut() {
            live += data.values().filter(|e| !e.is_expired_at(now)).count();
            data.clear();
        }
        self.key_count.store(0, Ordering::Relaxed);

        live
    }

    /// Returns the number of physically stored keys.
    ///
    /// Expired keys the sweeper has not reached yet are included.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns storage statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Physically removes expired entries.
    ///
    /// Called by the background sweeper. Shards whose lock is currently held
    /// are skipped rather than waited on.
    pub fn purge_expired(&self) -> PurgeOutcome {
        let mut outcome = PurgeOutcome::default();
        let now = Instant::now();

        for shard in &self.shards {
            let Some(mut data) = shard.data.try_write() else {
                outcome.skipped_shards += 1;
                continue;
            };

            let before = outcome.expired.len();
            data.retain(|key, entry| {
                if entry.is_expired_at(now) {
                    outcome.expired.push(key.clone());
                    false
                } else {
                    true
                }
            });

            // Must stay under the guard: flush resets key_count while
            // holding every shard.
            let purged = (outcome.expired.len() - before) as u64;
            if purged > 0 {
                self.key_count.fetch_sub(purged, Ordering::Relaxed);
                self.expired_count.fetch_add(purged, Ordering::Relaxed);
            }
        }

        outcome
    }
}

/// Storage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total reads
    pub get_ops: u64,
    /// Total writes
    pub set_ops: u64,
    /// Total delete attempts
    pub del_ops: u64,
    /// Total expired keys purged by the sweeper
    pub expired: u64,
}
