//! Mutation notifications.
//!
//! Every successful mutation, and every key purged by the expiry sweeper,
//! turns into a [`ChangeEvent`] that is handed to the
//! [`SubscriptionEngine`] synchronously, after the keyspace write has been
//! applied and its lock released.

use crate::storage::ExpiryListener;
use crate::subscription::SubscriptionEngine;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// What changed in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A single key was written, deleted or expired.
    Key { key: Bytes, at: Instant },
    /// Every key was removed at once (`FLUSHDB`).
    KeyspaceCleared { at: Instant },
}

impl ChangeEvent {
    pub fn key(key: Bytes) -> Self {
        ChangeEvent::Key {
            key,
            at: Instant::now(),
        }
    }

    pub fn keyspace_cleared() -> Self {
        ChangeEvent::KeyspaceCleared { at: Instant::now() }
    }

    pub fn timestamp(&self) -> Instant {
        match self {
            ChangeEvent::Key { at, .. } | ChangeEvent::KeyspaceCleared { at } => *at,
        }
    }
}

/// Fans mutation events out to the subscription engine.
pub struct MutationNotifier {
    subscriptions: Arc<SubscriptionEngine>,
    emitted: AtomicU64,
}

impl MutationNotifier {
    pub fn new(subscriptions: Arc<SubscriptionEngine>) -> Self {
        Self {
            subscriptions,
            emitted: AtomicU64::new(0),
        }
    }

    /// Reports a change to one key.
    pub fn key_changed(&self, key: &Bytes) {
        self.emit(ChangeEvent::key(key.clone()));
    }

    /// Reports changes to several keys, one event per key.
    pub fn keys_changed(&self, keys: &[Bytes]) {
        for key in keys {
            self.key_changed(key);
        }
    }

    /// Reports that the whole keyspace was cleared.
    pub fn keyspace_cleared(&self) {
        self.emit(ChangeEvent::keyspace_cleared());
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn emit(&self, event: ChangeEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        trace!(event = ?event, "Keyspace change");
        self.subscriptions.on_change(&event);
    }
}

impl ExpiryListener for MutationNotifier {
    fn keys_expired(&self, keys: &[Bytes]) {
        self.keys_changed(keys);
    }
}
