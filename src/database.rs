//! The embeddable engine.
//!
//! [`Database`] wires the keyspace, the subscription engine, the mutation
//! notifier and the expiry sweeper together. Transports only ever talk to
//! this type.

use crate::commands::{Command, CommandError, CommandExecutor, Reply};
use crate::storage::{ExpiryConfig, ExpiryListener, ExpirySweeper, StorageEngine, StorageStats};
use crate::subscription::{
    MutationNotifier, SubscriberChannel, SubscriberHandle, SubscriberId, SubscriptionConfig,
    SubscriptionEngine, SubscriptionId, SubscriptionStats,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Tunables for the whole engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub expiry: ExpiryConfig,
    pub subscriptions: SubscriptionConfig,
}

pub struct Database {
    storage: Arc<StorageEngine>,
    subscriptions: Arc<SubscriptionEngine>,
    notifier: Arc<MutationNotifier>,
    executor: CommandExecutor,
    sweeper: Mutex<Option<ExpirySweeper>>,
    config: EngineConfig,
}

impl Database {
    /// Builds an engine without the background sweeper.
    ///
    /// Expired keys are still invisible; they are only never reclaimed until
    /// [`Database::start_sweeper`] is called.
    pub fn new(config: EngineConfig) -> Self {
        let storage = Arc::new(StorageEngine::new());
        let subscriptions = Arc::new(SubscriptionEngine::new(
            Arc::clone(&storage),
            config.subscriptions.clone(),
        ));
        let notifier = Arc::new(MutationNotifier::new(Arc::clone(&subscriptions)));
        let executor = CommandExecutor::new(Arc::clone(&storage), Arc::clone(&notifier));

        Self {
            storage,
            subscriptions,
            notifier,
            executor,
            sweeper: Mutex::new(None),
            config,
        }
    }

    /// Builds an engine and starts its sweeper. Needs a Tokio runtime.
    pub fn start(config: EngineConfig) -> Self {
        let db = Self::new(config);
        db.start_sweeper();
        db
    }

    /// Starts the expiry sweeper if it is not running yet.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            let listener: Arc<dyn ExpiryListener> = self.notifier.clone();
            *sweeper = Some(ExpirySweeper::start(
                Arc::clone(&self.storage),
                self.config.expiry.clone(),
                Some(listener),
            ));
        }
    }

    /// Parses and executes one command.
    pub fn execute(&self, name: &str, args: &[Bytes]) -> Result<Reply, CommandError> {
        self.executor.execute(name, args)
    }

    /// Executes an already parsed command.
    pub fn run(&self, command: &Command) -> Result<Reply, CommandError> {
        self.executor.run(command)
    }

    pub fn open_subscriber(&self) -> SubscriberChannel {
        self.subscriptions.open_subscriber()
    }

    /// Watches a read query. The first push carries its current result.
    pub fn subscribe(
        &self,
        query: Command,
        subscriber: &SubscriberHandle,
    ) -> Result<SubscriptionId, CommandError> {
        self.subscriptions.subscribe(query, subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    pub fn drop_subscriber(&self, subscriber: SubscriberId) -> usize {
        self.subscriptions.drop_subscriber(subscriber)
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn storage_stats(&self) -> StorageStats {
        self.storage.stats()
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.subscriptions.stats()
    }

    /// Stops the sweeper and logs final counters.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }

        let storage = self.storage.stats();
        let subscriptions = self.subscriptions.stats();
        info!(
            keys = storage.keys,
            get_ops = storage.get_ops,
            set_ops = storage.set_ops,
            del_ops = storage.del_ops,
            expired = storage.expired,
            events = self.notifier.emitted(),
            subscriptions = subscriptions.active,
            pushes = subscriptions.pushes,
            suppressed = subscriptions.suppressed,
            evictions = subscriptions.evictions,
            "Engine stopped"
        );
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[test]
    fn test_write_reaches_watcher() {
        let db = Database::default();
        let mut channel = db.open_subscriber();

        let query = Command::parse("GET", &args(&["user"])).unwrap();
        let id = db.subscribe(query, &channel.handle).unwrap();
        assert_eq!(channel.pushes.try_recv().unwrap().result, Ok(Reply::Nil));

        db.execute("SET", &args(&["user", "ann"])).unwrap();
        let push = channel.pushes.try_recv().unwrap();
        assert_eq!(push.subscription, id);
        assert_eq!(push.result, Ok(Reply::bulk("ann")));

        db.execute("FLUSHDB", &[]).unwrap();
        assert_eq!(channel.pushes.try_recv().unwrap().result, Ok(Reply::Nil));

        assert!(db.unsubscribe(id));
        db.execute("SET", &args(&["user", "bob"])).unwrap();
        assert!(channel.pushes.try_recv().is_err());
    }

    #[test]
    fn test_failed_write_pushes_nothing() {
        let db = Database::default();
        db.execute("SET", &args(&["n", "text"])).unwrap();

        let mut channel = db.open_subscriber();
        let query = Command::parse("GET", &args(&["n"])).unwrap();
        db.subscribe(query, &channel.handle).unwrap();
        channel.pushes.try_recv().unwrap();

        assert_eq!(
            db.execute("INCR", &args(&["n"])),
            Err(CommandError::NotAnInteger)
        );
        assert!(channel.pushes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweeper_expiry_reaches_watcher() {
        let config = EngineConfig {
            expiry: ExpiryConfig {
                base_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let db = Database::start(config);
        db.execute("SET", &args(&["session", "x", "PX", "30"])).unwrap();

        let mut channel = db.open_subscriber();
        let query = Command::parse("EXISTS", &args(&["session"])).unwrap();
        db.subscribe(query, &channel.handle).unwrap();
        assert_eq!(
            channel.pushes.recv().await.unwrap().result,
            Ok(Reply::Integer(1))
        );

        let push = tokio::time::timeout(Duration::from_secs(2), channel.pushes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(push.result, Ok(Reply::Integer(0)));

        db.shutdown().await;
    }
}
