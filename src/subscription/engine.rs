//! Subscription Engine
//!
//! Keeps read queries live. A client registers a watchable query (`GET`,
//! `EXISTS`, `TYPE`) once, gets its current result pushed immediately, and
//! afterwards gets a new push every time the result changes.
//!
//! ## Lifecycle
//!
//! ```text
//!  subscribe()            first evaluation             unsubscribe() /
//!      │                       │                        drop_subscriber()
//!      ▼                       ▼                              ▼
//! ┌────────────┐        ┌────────────┐                ┌──────────────┐
//! │ Registered │──────> │   Active   │ ─────────────> │ Unregistered │
//! └────────────┘        └────────────┘                └──────────────┘
//! ```
//!
//! ## Ordering
//!
//! Keys are indexed before the first evaluation, so a write that lands
//! between the two is either seen by the first evaluation or triggers a
//! re-evaluation afterwards. Every evaluation and the push that follows it
//! happen under the subscription's own lock, which makes pushes for one
//! subscription arrive in the order their results were computed. A result
//! equal to the last one pushed is dropped.
//!
//! ## Delivery
//!
//! Each subscriber owns a bounded queue. Pushes are never awaited: if the
//! queue is full the subscriber is evicted (all its subscriptions are
//! removed and its session is told to close), if it is closed the
//! subscriber is simply dropped.

use crate::commands::{query, Command, CommandError, Reply};
use crate::storage::StorageEngine;
use crate::subscription::ChangeEvent;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub type SubscriptionId = u64;
pub type SubscriberId = u64;

/// The value a watched query evaluates to.
pub type QueryResult = Result<Reply, CommandError>;

/// Configuration for the subscription engine.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Pushes a subscriber may have queued before it is evicted.
    pub push_buffer: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { push_buffer: 1024 }
    }
}

/// A pushed query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Push {
    pub subscription: SubscriptionId,
    /// Canonical text of the watched query, e.g. `GET user:1`.
    pub query: String,
    pub result: QueryResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Registered,
    Active,
    Unregistered,
}

/// The engine's side of a subscriber: where pushes go.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    pushes: mpsc::Sender<Push>,
    evicted: Arc<watch::Sender<bool>>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns true once the engine has given up on this subscriber.
    pub fn is_evicted(&self) -> bool {
        *self.evicted.borrow()
    }
}

/// The session's side of a subscriber.
#[derive(Debug)]
pub struct SubscriberChannel {
    pub handle: SubscriberHandle,
    /// Pushes in delivery order.
    pub pushes: mpsc::Receiver<Push>,
    /// Flips to `true` when the subscriber is evicted for falling behind.
    pub evicted: watch::Receiver<bool>,
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub active: usize,
    pub pushes: u64,
    pub suppressed: u64,
    pub evictions: u64,
}

struct Subscription {
    id: SubscriptionId,
    query: Command,
    query_text: String,
    subscriber: SubscriberHandle,
    inner: Mutex<SubscriptionInner>,
}

struct SubscriptionInner {
    state: SubscriptionState,
    last_result: Option<QueryResult>,
}

enum Delivery {
    Sent,
    Overflowed,
    Disconnected,
}

impl Subscription {
    fn deliver(&self, result: QueryResult) -> Delivery {
        let push = Push {
            subscription: self.id,
            query: self.query_text.clone(),
            result,
        };
        match self.subscriber.pushes.try_send(push) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Overflowed,
            Err(TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }
}

/// Registry of live queries plus the key index that routes change events.
pub struct SubscriptionEngine {
    storage: Arc<StorageEngine>,
    config: SubscriptionConfig,

    subscriptions: DashMap<SubscriptionId, Arc<Subscription>>,
    by_key: DashMap<Bytes, HashSet<SubscriptionId>>,
    by_subscriber: DashMap<SubscriberId, HashSet<SubscriptionId>>,

    next_subscription: AtomicU64,
    next_subscriber: AtomicU64,

    pushes: AtomicU64,
    suppressed: AtomicU64,
    evictions: AtomicU64,
}

impl SubscriptionEngine {
    pub fn new(storage: Arc<StorageEngine>, config: SubscriptionConfig) -> Self {
        Self {
            storage,
            config,
            subscriptions: DashMap::new(),
            by_key: DashMap::new(),
            by_subscriber: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            next_subscriber: AtomicU64::new(1),
            pushes: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a subscriber with a push queue of the configured size.
    pub fn open_subscriber(&self) -> SubscriberChannel {
        let (push_tx, push_rx) = mpsc::channel(self.config.push_buffer.max(1));
        let (evicted_tx, evicted_rx) = watch::channel(false);

        let handle = SubscriberHandle {
            id: self.next_subscriber.fetch_add(1, Ordering::Relaxed),
            pushes: push_tx,
            evicted: Arc::new(evicted_tx),
        };

        SubscriberChannel {
            handle,
            pushes: push_rx,
            evicted: evicted_rx,
        }
    }

    /// Registers `query` for `subscriber` and pushes its current result.
    pub fn subscribe(
        &self,
        query: Command,
        subscriber: &SubscriberHandle,
    ) -> Result<SubscriptionId, CommandError> {
        if !query.is_watchable() {
            return Err(CommandError::NotWatchable(query.name().to_ascii_lowercase()));
        }

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(Subscription {
            id,
            query_text: query.to_string(),
            query,
            subscriber: subscriber.clone(),
            inner: Mutex::new(SubscriptionInner {
                state: SubscriptionState::Registered,
                last_result: None,
            }),
        });

        // Held until the first push is queued; events racing with
        // registration wait here and then compare against that result.
        let mut inner = subscription.inner.lock();

        self.subscriptions.insert(id, Arc::clone(&subscription));
        for key in subscription.query.keys() {
            self.by_key.entry(key.clone()).or_default().insert(id);
        }
        self.by_subscriber
            .entry(subscriber.id)
            .or_default()
            .insert(id);

        let result = query::evaluate(&self.storage, &subscription.query);
        inner.last_result = Some(result.clone());
        inner.state = SubscriptionState::Active;
        let delivery = subscription.deliver(result);
        drop(inner);

        debug!(
            subscription = id,
            subscriber = subscriber.id,
            query = %subscription.query_text,
            "Subscription registered"
        );

        self.settle(&subscription, delivery);
        Ok(id)
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, subscription)) = self.subscriptions.remove(&id) else {
            return false;
        };

        subscription.inner.lock().state = SubscriptionState::Unregistered;

        for key in subscription.query.keys() {
            if let Some(mut ids) = self.by_key.get_mut(key) {
                ids.remove(&id);
            }
            self.by_key.remove_if(key, |_, ids| ids.is_empty());
        }

        let owner = subscription.subscriber.id;
        if let Some(mut ids) = self.by_subscriber.get_mut(&owner) {
            ids.remove(&id);
        }
        self.by_subscriber.remove_if(&owner, |_, ids| ids.is_empty());

        debug!(subscription = id, "Subscription removed");
        true
    }

    /// Removes every subscription owned by `subscriber`.
    ///
    /// Returns how many were removed.
    pub fn drop_subscriber(&self, subscriber: SubscriberId) -> usize {
        let ids = self
            .by_subscriber
            .remove(&subscriber)
            .map(|(_, ids)| ids)
            .unwrap_or_default();

        ids.into_iter().filter(|id| self.unsubscribe(*id)).count()
    }

    /// Re-evaluates every subscription affected by `event`.
    pub fn on_change(&self, event: &ChangeEvent) {
        let ids: Vec<SubscriptionId> = match event {
            ChangeEvent::Key { key, .. } => match self.by_key.get(key) {
                Some(ids) => ids.iter().copied().collect(),
                None => return,
            },
            ChangeEvent::KeyspaceCleared { .. } => {
                self.subscriptions.iter().map(|entry| *entry.key()).collect()
            }
        };

        for id in ids {
            let subscription = self.subscriptions.get(&id).map(|entry| Arc::clone(entry.value()));
            if let Some(subscription) = subscription {
                self.refresh(&subscription);
            }
        }
    }

    /// Lifecycle state of a subscription, or `None` once it is gone.
    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        let subscription = self.subscriptions.get(&id).map(|entry| Arc::clone(entry.value()))?;
        let state = subscription.inner.lock().state;
        Some(state)
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            active: self.subscriptions.len(),
            pushes: self.pushes.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn refresh(&self, subscription: &Arc<Subscription>) {
        let delivery = {
            let mut inner = subscription.inner.lock();
            if inner.state != SubscriptionState::Active {
                return;
            }

            let result = query::evaluate(&self.storage, &subscription.query);
            if inner.last_result.as_ref() == Some(&result) {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                return;
            }

            inner.last_result = Some(result.clone());
            subscription.deliver(result)
        };

        self.settle(subscription, delivery);
    }

    /// Acts on a delivery outcome. Must run without the subscription lock.
    fn settle(&self, subscription: &Subscription, delivery: Delivery) {
        match delivery {
            Delivery::Sent => {
                self.pushes.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Overflowed => {
                let subscriber = &subscription.subscriber;
                if subscriber.evicted.send_replace(true) {
                    return;
                }
                self.evictions.fetch_add(1, Ordering::Relaxed);
                let removed = self.drop_subscriber(subscriber.id);
                warn!(
                    subscriber = subscriber.id,
                    subscriptions = removed,
                    "Push buffer full, evicting subscriber"
                );
            }
            Delivery::Disconnected => {
                let removed = self.drop_subscriber(subscription.subscriber.id);
                debug!(
                    subscriber = subscription.subscriber.id,
                    subscriptions = removed,
                    "Subscriber gone, dropping its subscriptions"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use std::thread;

    fn setup(push_buffer: usize) -> (Arc<StorageEngine>, SubscriptionEngine) {
        let storage = Arc::new(StorageEngine::new());
        let engine = SubscriptionEngine::new(
            Arc::clone(&storage),
            SubscriptionConfig { push_buffer },
        );
        (storage, engine)
    }

    fn get(key: &'static str) -> Command {
        Command::Get {
            key: Bytes::from(key),
        }
    }

    fn key_event(key: &'static str) -> ChangeEvent {
        ChangeEvent::key(Bytes::from(key))
    }

    fn next_result(channel: &mut SubscriberChannel) -> Option<QueryResult> {
        channel.pushes.try_recv().ok().map(|push| push.result)
    }

    #[test]
    fn test_initial_push() {
        let (storage, engine) = setup(16);
        storage.set(Bytes::from("k"), Value::from("v"), None);

        let mut channel = engine.open_subscriber();
        let id = engine.subscribe(get("k"), &channel.handle).unwrap();

        let push = channel.pushes.try_recv().unwrap();
        assert_eq!(push.subscription, id);
        assert_eq!(push.query, "GET k");
        assert_eq!(push.result, Ok(Reply::bulk("v")));
        assert_eq!(engine.state(id), Some(SubscriptionState::Active));
    }

    #[test]
    fn test_rejects_unwatchable_query() {
        let (_storage, engine) = setup(16);
        let channel = engine.open_subscriber();

        let result = engine.subscribe(
            Command::Ttl {
                key: Bytes::from("k"),
            },
            &channel.handle,
        );
        assert_eq!(result, Err(CommandError::NotWatchable("ttl".to_string())));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_pushes_on_change_and_suppresses_duplicates() {
        let (storage, engine) = setup(16);
        let mut channel = engine.open_subscriber();
        engine.subscribe(get("k"), &channel.handle).unwrap();
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::Nil)));

        storage.set(Bytes::from("k"), Value::from("1"), None);
        engine.on_change(&key_event("k"));
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::bulk("1"))));

        // Same value written again: nothing to push
        storage.set(Bytes::from("k"), Value::from("1"), None);
        engine.on_change(&key_event("k"));
        assert_eq!(next_result(&mut channel), None);

        // Unrelated key
        storage.set(Bytes::from("other"), Value::from("1"), None);
        engine.on_change(&key_event("other"));
        assert_eq!(next_result(&mut channel), None);

        let stats = engine.stats();
        assert_eq!(stats.pushes, 2);
        assert_eq!(stats.suppressed, 1);
    }

    #[test]
    fn test_exists_watch_with_duplicate_keys() {
        let (storage, engine) = setup(16);
        let mut channel = engine.open_subscriber();
        let query = Command::Exists {
            keys: vec![Bytes::from("a"), Bytes::from("a")],
        };
        engine.subscribe(query, &channel.handle).unwrap();
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::Integer(0))));

        storage.set(Bytes::from("a"), Value::from("x"), None);
        engine.on_change(&key_event("a"));
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::Integer(2))));
        assert_eq!(next_result(&mut channel), None);
    }

    #[test]
    fn test_keyspace_cleared_reaches_everyone() {
        let (storage, engine) = setup(16);
        storage.set(Bytes::from("a"), Value::from("1"), None);
        storage.set(Bytes::from("b"), Value::from("2"), None);

        let mut channel = engine.open_subscriber();
        engine.subscribe(get("a"), &channel.handle).unwrap();
        engine.subscribe(get("b"), &channel.handle).unwrap();
        assert!(next_result(&mut channel).is_some());
        assert!(next_result(&mut channel).is_some());

        storage.flush();
        engine.on_change(&ChangeEvent::keyspace_cleared());
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::Nil)));
        assert_eq!(next_result(&mut channel), Some(Ok(Reply::Nil)));
    }

    #[test]
    fn test_unsubscribe_stops_pushes() {
        let (storage, engine) = setup(16);
        let mut channel = engine.open_subscriber();
        let id = engine.subscribe(get("k"), &channel.handle).unwrap();
        next_result(&mut channel);

        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
        assert_eq!(engine.state(id), None);

        storage.set(Bytes::from("k"), Value::from("1"), None);
        engine.on_change(&key_event("k"));
        assert_eq!(next_result(&mut channel), None);
        assert!(engine.by_key.is_empty());
        assert!(engine.by_subscriber.is_empty());
    }

    #[test]
    fn test_full_buffer_evicts_subscriber() {
        let (storage, engine) = setup(1);
        let channel = engine.open_subscriber();
        engine.subscribe(get("k"), &channel.handle).unwrap();
        engine.subscribe(get("j"), &channel.handle).unwrap();

        // First push filled the queue; the second overflowed
        assert!(*channel.evicted.borrow());
        assert!(channel.handle.is_evicted());
        assert!(engine.is_empty());
        assert_eq!(engine.stats().evictions, 1);

        storage.set(Bytes::from("k"), Value::from("1"), None);
        engine.on_change(&key_event("k"));
        assert_eq!(engine.stats().pushes, 1);
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let (storage, engine) = setup(16);
        let channel = engine.open_subscriber();
        let handle = channel.handle.clone();
        engine.subscribe(get("k"), &handle).unwrap();
        drop(channel);

        storage.set(Bytes::from("k"), Value::from("1"), None);
        engine.on_change(&key_event("k"));
        assert!(engine.is_empty());
        assert_eq!(engine.stats().evictions, 0);
    }

    #[test]
    fn test_drop_subscriber_only_touches_its_own() {
        let (_storage, engine) = setup(16);
        let first = engine.open_subscriber();
        let second = engine.open_subscriber();
        engine.subscribe(get("k"), &first.handle).unwrap();
        engine.subscribe(get("j"), &first.handle).unwrap();
        let kept = engine.subscribe(get("k"), &second.handle).unwrap();

        assert_eq!(engine.drop_subscriber(first.handle.id()), 2);
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.state(kept), Some(SubscriptionState::Active));
    }

    #[test]
    fn test_unsubscribe_racing_refresh_leaves_nothing_behind() {
        use std::sync::atomic::AtomicBool;

        let (storage, engine) = setup(100_000);
        let engine = Arc::new(engine);
        let stop = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let engine = Arc::clone(&engine);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut n = 0;
                    while !stop.load(Ordering::Relaxed) {
                        n += 1;
                        storage.set(Bytes::from("hot"), Value::Int(n), None);
                        engine.on_change(&key_event("hot"));
                    }
                })
            })
            .collect();

        let churners: Vec<_> = (0..4)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..200 {
                        let mut channel = engine.open_subscriber();
                        let id = engine.subscribe(get("hot"), &channel.handle).unwrap();
                        if (t + i) % 2 == 0 {
                            assert!(engine.unsubscribe(id));
                        } else {
                            assert_eq!(engine.drop_subscriber(channel.handle.id()), 1);
                        }

                        // Whatever was queued before removal is all there is
                        while channel.pushes.try_recv().is_ok() {}
                        for _ in 0..10 {
                            thread::yield_now();
                        }
                        assert!(channel.pushes.try_recv().is_err());
                    }
                })
            })
            .collect();

        for churner in churners {
            churner.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for writer in writers {
            writer.join().unwrap();
        }

        assert!(engine.is_empty());
        assert!(engine.by_key.is_empty());
        assert!(engine.by_subscriber.is_empty());
    }

    #[test]
    fn test_concurrent_writes_converge_on_last_value() {
        let (storage, engine) = setup(100_000);
        let engine = Arc::new(engine);
        let mut channel = engine.open_subscriber();
        engine.subscribe(get("counter"), &channel.handle).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..250 {
                        storage
                            .mutate_numeric(&Bytes::from("counter"), crate::storage::NumericOp::Add(1))
                            .unwrap();
                        engine.on_change(&ChangeEvent::key(Bytes::from("counter")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = None;
        while let Some(result) = next_result(&mut channel) {
            if let (Some(Ok(Reply::Bulk(prev))), Ok(Reply::Bulk(next))) = (&last, &result) {
                assert_ne!(prev, next);
            }
            last = Some(result);
        }
        assert_eq!(last, Some(Ok(Reply::bulk("1000"))));
    }
}
