//! Command Executor
//!
//! Runs parsed [`Command`]s against the [`StorageEngine`] and reports every
//! successful mutation to the [`MutationNotifier`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandExecutor                         │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   parse()   │───>│    run()    │───>│  notify()   │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                            │                  │             │
//! │                            ▼                  ▼             │
//! │                      StorageEngine   SubscriptionEngine     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Notifications are sent after the storage call returns, so the keyspace
//! lock is never held while subscriptions are re-evaluated. Failed commands
//! and no-op writes (an unmet `NX`, deleting a missing key) emit nothing.

use crate::commands::{query, Command, CommandError, Reply};
use crate::storage::{NumericOp, StorageEngine, Value};
use crate::subscription::MutationNotifier;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Executes commands and emits change events for the writes that succeed.
#[derive(Clone)]
pub struct CommandExecutor {
    storage: Arc<StorageEngine>,
    notifier: Arc<MutationNotifier>,
}

impl CommandExecutor {
    pub fn new(storage: Arc<StorageEngine>, notifier: Arc<MutationNotifier>) -> Self {
        Self { storage, notifier }
    }

    /// Parses and runs a command given by name and raw arguments.
    pub fn execute(&self, name: &str, args: &[Bytes]) -> Result<Reply, CommandError> {
        let command = Command::parse(name, args)?;
        self.run(&command)
    }

    /// Runs an already parsed command.
    pub fn run(&self, command: &Command) -> Result<Reply, CommandError> {
        trace!(command = %command, "Executing");

        match command {
            Command::Set {
                key,
                value,
                options,
            } => {
                let written = self
                    .storage
                    .set_with(key.clone(), Value::from_bytes(value.clone()), *options);
                match written {
                    Some(_) => {
                        self.notifier.key_changed(key);
                        Ok(Reply::ok())
                    }
                    None => Ok(Reply::Nil),
                }
            }

            Command::Del { keys } => {
                let removed = self.storage.delete(keys);
                self.notifier.keys_changed(&removed);
                Ok(Reply::Integer(removed.len() as i64))
            }

            Command::Incr { key } => self.mutate_numeric(key, NumericOp::Add(1)),
            Command::IncrBy { key, delta } => self.mutate_numeric(key, NumericOp::Add(*delta)),
            Command::Decr { key } => self.mutate_numeric(key, NumericOp::Sub(1)),
            Command::DecrBy { key, amount } => self.mutate_numeric(key, NumericOp::Sub(*amount)),

            Command::Expire { key, seconds } => self.expire(key, *seconds),

            Command::Persist { key } => {
                let changed = self.storage.persist(key);
                if changed {
                    self.notifier.key_changed(key);
                }
                Ok(Reply::Integer(changed as i64))
            }

            Command::FlushDb => {
                let cleared = self.storage.flush();
                trace!(cleared, "Keyspace flushed");
                self.notifier.keyspace_cleared();
                Ok(Reply::ok())
            }

            _ => query::evaluate(&self.storage, command),
        }
    }

    fn mutate_numeric(&self, key: &Bytes, op: NumericOp) -> Result<Reply, CommandError> {
        let n = self.storage.mutate_numeric(key, op)?;
        self.notifier.key_changed(key);
        Ok(Reply::Integer(n))
    }

    fn expire(&self, key: &Bytes, seconds: i64) -> Result<Reply, CommandError> {
        if seconds <= 0 {
            let removed = self.storage.delete(std::slice::from_ref(key));
            self.notifier.keys_changed(&removed);
            return Ok(Reply::Integer(removed.len() as i64));
        }

        // Must still be representable in milliseconds
        if seconds.checked_mul(1000).is_none() {
            return Err(CommandError::InvalidExpireTime("expire".to_string()));
        }

        let changed = self
            .storage
            .expire(key, Duration::from_secs(seconds as u64));
        if changed {
            self.notifier.key_changed(key);
        }
        Ok(Reply::Integer(changed as i64))
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{SubscriptionConfig, SubscriptionEngine};

    fn create_executor() -> CommandExecutor {
        let storage = Arc::new(StorageEngine::new());
        let subscriptions = Arc::new(SubscriptionEngine::new(
            Arc::clone(&storage),
            SubscriptionConfig::default(),
        ));
        CommandExecutor::new(storage, Arc::new(MutationNotifier::new(subscriptions)))
    }

    fn run(executor: &CommandExecutor, line: &str) -> Result<Reply, CommandError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap();
        let args: Vec<Bytes> = parts.map(|p| Bytes::from(p.to_string())).collect();
        executor.execute(name, &args)
    }

    #[test]
    fn test_ping() {
        let executor = create_executor();

        assert_eq!(run(&executor, "PING"), Ok(Reply::Status("PONG")));
        assert_eq!(run(&executor, "PING hello"), Ok(Reply::bulk("hello")));
        assert_eq!(run(&executor, "ECHO hi"), Ok(Reply::bulk("hi")));
    }

    #[test]
    fn test_set_get() {
        let executor = create_executor();

        assert_eq!(run(&executor, "SET key value"), Ok(Reply::ok()));
        assert_eq!(run(&executor, "GET key"), Ok(Reply::bulk("value")));
        assert_eq!(run(&executor, "GET nonexistent"), Ok(Reply::Nil));
    }

    #[test]
    fn test_set_conditions() {
        let executor = create_executor();

        assert_eq!(run(&executor, "SET key v1 XX"), Ok(Reply::Nil));
        assert_eq!(run(&executor, "SET key v1 NX"), Ok(Reply::ok()));
        assert_eq!(run(&executor, "SET key v2 NX"), Ok(Reply::Nil));
        assert_eq!(run(&executor, "GET key"), Ok(Reply::bulk("v1")));
        assert_eq!(run(&executor, "SET key v3 XX"), Ok(Reply::ok()));
        assert_eq!(run(&executor, "GET key"), Ok(Reply::bulk("v3")));
    }

    #[test]
    fn test_set_expiry_and_keepttl() {
        let executor = create_executor();

        run(&executor, "SET key v EX 100").unwrap();
        assert_eq!(run(&executor, "TTL key"), Ok(Reply::Integer(100)));

        run(&executor, "SET key v2 KEEPTTL").unwrap();
        assert_eq!(run(&executor, "TTL key"), Ok(Reply::Integer(100)));

        run(&executor, "SET key v3").unwrap();
        assert_eq!(run(&executor, "TTL key"), Ok(Reply::Integer(-1)));
    }

    #[test]
    fn test_del() {
        let executor = create_executor();

        run(&executor, "SET key1 value1").unwrap();
        run(&executor, "SET key2 value2").unwrap();

        assert_eq!(run(&executor, "DEL key1 key2 key3"), Ok(Reply::Integer(2)));
        assert_eq!(run(&executor, "DEL key1"), Ok(Reply::Integer(0)));
    }

    #[test]
    fn test_exists() {
        let executor = create_executor();

        run(&executor, "SET key1 value1").unwrap();

        assert_eq!(run(&executor, "EXISTS key1"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "EXISTS nonexistent"), Ok(Reply::Integer(0)));
        assert_eq!(
            run(&executor, "EXISTS key1 key1 nonexistent key1"),
            Ok(Reply::Integer(3))
        );
    }

    #[test]
    fn test_exists_ignores_expired_keys() {
        let executor = create_executor();

        run(&executor, "SET short v PX 20").unwrap();
        run(&executor, "SET long v").unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(run(&executor, "EXISTS short long"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "GET short"), Ok(Reply::Nil));
        assert_eq!(run(&executor, "TTL short"), Ok(Reply::Integer(-2)));
    }

    #[test]
    fn test_set_ex_expires_after_seconds() {
        let executor = create_executor();

        run(&executor, "SET session v EX 1").unwrap();
        assert_eq!(run(&executor, "EXISTS session"), Ok(Reply::Integer(1)));

        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(run(&executor, "EXISTS session"), Ok(Reply::Integer(0)));
        assert_eq!(run(&executor, "GET session"), Ok(Reply::Nil));
    }

    #[test]
    fn test_incr_decr() {
        let executor = create_executor();

        assert_eq!(run(&executor, "INCR counter"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "INCR counter"), Ok(Reply::Integer(2)));
        assert_eq!(run(&executor, "DECR counter"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "INCRBY counter 10"), Ok(Reply::Integer(11)));
        assert_eq!(run(&executor, "GET counter"), Ok(Reply::bulk("11")));
    }

    #[test]
    fn test_decrby_sequence() {
        let executor = create_executor();

        run(&executor, "SET k1 10").unwrap();
        assert_eq!(run(&executor, "DECRBY k1 3"), Ok(Reply::Integer(7)));
        assert_eq!(run(&executor, "DECRBY k1 -5"), Ok(Reply::Integer(12)));
        assert_eq!(run(&executor, "DECRBY fresh 4"), Ok(Reply::Integer(-4)));
        assert_eq!(run(&executor, "DECRBY k1 abc"), Err(CommandError::NotAnInteger));
        assert_eq!(run(&executor, "GET k1"), Ok(Reply::bulk("12")));

        assert_eq!(run(&executor, "DECRBY k5 abc"), Err(CommandError::NotAnInteger));
        assert_eq!(run(&executor, "EXISTS k5"), Ok(Reply::Integer(0)));
        assert_eq!(run(&executor, "GET k5"), Ok(Reply::Nil));
    }

    #[test]
    fn test_decr_on_non_integer() {
        let executor = create_executor();

        run(&executor, "SET name alice").unwrap();
        assert_eq!(run(&executor, "DECR name"), Err(CommandError::NotAnInteger));
        assert_eq!(run(&executor, "INCR name"), Err(CommandError::NotAnInteger));
        assert_eq!(run(&executor, "GET name"), Ok(Reply::bulk("alice")));
    }

    #[test]
    fn test_decr_overflow() {
        let executor = create_executor();

        run(&executor, &format!("SET low {}", i64::MIN + 1)).unwrap();
        assert_eq!(run(&executor, "DECR low"), Ok(Reply::Integer(i64::MIN)));
        assert_eq!(run(&executor, "DECR low"), Err(CommandError::Overflow));
        assert_eq!(
            run(&executor, &format!("DECRBY low {}", i64::MIN)),
            Err(CommandError::Overflow)
        );
        assert_eq!(run(&executor, "GET low"), Ok(Reply::bulk(i64::MIN.to_string())));

        run(&executor, &format!("SET high {}", i64::MAX)).unwrap();
        assert_eq!(run(&executor, "INCR high"), Err(CommandError::Overflow));
        assert_eq!(run(&executor, "DECRBY high -1"), Err(CommandError::Overflow));
    }

    #[test]
    fn test_decr_keeps_ttl() {
        let executor = create_executor();

        run(&executor, "SET n 5 EX 100").unwrap();
        run(&executor, "DECR n").unwrap();
        assert_eq!(run(&executor, "TTL n"), Ok(Reply::Integer(100)));
    }

    #[test]
    fn test_expire_persist_ttl() {
        let executor = create_executor();

        assert_eq!(run(&executor, "EXPIRE missing 10"), Ok(Reply::Integer(0)));

        run(&executor, "SET key value").unwrap();
        assert_eq!(run(&executor, "TTL key"), Ok(Reply::Integer(-1)));
        assert_eq!(run(&executor, "EXPIRE key 10"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "TTL key"), Ok(Reply::Integer(10)));
        assert_eq!(run(&executor, "PERSIST key"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "PERSIST key"), Ok(Reply::Integer(0)));
        assert_eq!(run(&executor, "PTTL key"), Ok(Reply::Integer(-1)));

        assert_eq!(run(&executor, "EXPIRE key 0"), Ok(Reply::Integer(1)));
        assert_eq!(run(&executor, "EXISTS key"), Ok(Reply::Integer(0)));

        run(&executor, "SET key value").unwrap();
        assert_eq!(
            run(&executor, &format!("EXPIRE key {}", i64::MAX)),
            Err(CommandError::InvalidExpireTime("expire".to_string()))
        );
    }

    #[test]
    fn test_type() {
        let executor = create_executor();

        run(&executor, "SET s hello").unwrap();
        run(&executor, "INCR n").unwrap();

        assert_eq!(run(&executor, "TYPE s"), Ok(Reply::Status("string")));
        assert_eq!(run(&executor, "TYPE n"), Ok(Reply::Status("string")));
        assert_eq!(run(&executor, "TYPE nothing"), Ok(Reply::Status("none")));
    }

    #[test]
    fn test_dbsize_and_flushdb() {
        let executor = create_executor();

        assert_eq!(run(&executor, "DBSIZE"), Ok(Reply::Integer(0)));
        run(&executor, "SET key1 value1").unwrap();
        run(&executor, "SET key2 value2").unwrap();
        assert_eq!(run(&executor, "DBSIZE"), Ok(Reply::Integer(2)));

        assert_eq!(run(&executor, "FLUSHDB"), Ok(Reply::ok()));
        assert_eq!(run(&executor, "DBSIZE"), Ok(Reply::Integer(0)));
    }

    #[test]
    fn test_unknown_command() {
        let executor = create_executor();

        assert_eq!(
            run(&executor, "UNKNOWNCMD"),
            Err(CommandError::UnknownCommand("UNKNOWNCMD".to_string()))
        );
    }

    #[test]
    fn test_events_only_for_effective_writes() {
        let storage = Arc::new(StorageEngine::new());
        let subscriptions = Arc::new(SubscriptionEngine::new(
            Arc::clone(&storage),
            SubscriptionConfig::default(),
        ));
        let notifier = Arc::new(MutationNotifier::new(subscriptions));
        let executor = CommandExecutor::new(storage, Arc::clone(&notifier));

        run(&executor, "SET a 1").unwrap();
        run(&executor, "SET a 2 NX").unwrap();
        run(&executor, "GET a").unwrap();
        run(&executor, "DEL a b").unwrap();
        run(&executor, "DEL a").unwrap();
        run(&executor, "PERSIST missing").unwrap();
        let _ = run(&executor, "INCR a x");
        assert_eq!(notifier.emitted(), 2);

        run(&executor, "FLUSHDB").unwrap();
        assert_eq!(notifier.emitted(), 3);
    }
}
