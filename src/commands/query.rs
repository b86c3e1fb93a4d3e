//! Read-only evaluation.
//!
//! Pure reads are evaluated here so that the executor and the subscription
//! engine produce identical results for the same query.

use crate::commands::{Command, CommandError, Reply};
use crate::storage::{StorageEngine, Ttl};

/// Evaluates a read-only command against the current keyspace.
///
/// Write commands are refused with [`CommandError::NotWatchable`]; callers
/// route those through the executor instead.
pub fn evaluate(storage: &StorageEngine, command: &Command) -> Result<Reply, CommandError> {
    let reply = match command {
        Command::Ping(None) => Reply::Status("PONG"),
        Command::Ping(Some(message)) | Command::Echo(message) => Reply::Bulk(message.clone()),
        Command::Get { key } => match storage.get(key) {
            Some(value) => Reply::Bulk(value.to_bytes()),
            None => Reply::Nil,
        },
        Command::Exists { keys } => Reply::Integer(storage.exists(keys) as i64),
        Command::Type { key } => {
            let name = storage.kind(key).map_or("none", |kind| kind.type_name());
            Reply::Status(name)
        }
        Command::Ttl { key } => Reply::Integer(match storage.ttl(key) {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            // Rounded to the nearest second
            Ttl::Expires(left) => ((left.as_millis() + 500) / 1000) as i64,
        }),
        Command::Pttl { key } => Reply::Integer(match storage.ttl(key) {
            Ttl::Missing => -2,
            Ttl::Persistent => -1,
            Ttl::Expires(left) => left.as_millis() as i64,
        }),
        Command::DbSize => Reply::Integer(storage.len() as i64),
        other => {
            return Err(CommandError::NotWatchable(
                other.name().to_ascii_lowercase(),
            ))
        }
    };

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Value;
    use bytes::Bytes;
    use std::time::Duration;

    fn key(name: &'static str) -> Bytes {
        Bytes::from(name)
    }

    #[test]
    fn test_get_and_type() {
        let storage = StorageEngine::new();
        storage.set(key("n"), Value::from(12), None);

        assert_eq!(
            evaluate(&storage, &Command::Get { key: key("n") }),
            Ok(Reply::bulk("12"))
        );
        assert_eq!(
            evaluate(&storage, &Command::Type { key: key("n") }),
            Ok(Reply::Status("string"))
        );
        assert_eq!(
            evaluate(&storage, &Command::Type { key: key("missing") }),
            Ok(Reply::Status("none"))
        );
        assert_eq!(
            evaluate(&storage, &Command::Get { key: key("missing") }),
            Ok(Reply::Nil)
        );
    }

    #[test]
    fn test_exists_counts_duplicates() {
        let storage = StorageEngine::new();
        storage.set(key("a"), Value::from("1"), None);

        let command = Command::Exists {
            keys: vec![key("a"), key("a"), key("b")],
        };
        assert_eq!(evaluate(&storage, &command), Ok(Reply::Integer(2)));
    }

    #[test]
    fn test_ttl_values() {
        let storage = StorageEngine::new();
        storage.set(key("p"), Value::from("1"), None);
        storage.set(key("t"), Value::from("1"), Some(Duration::from_secs(10)));

        assert_eq!(
            evaluate(&storage, &Command::Ttl { key: key("missing") }),
            Ok(Reply::Integer(-2))
        );
        assert_eq!(
            evaluate(&storage, &Command::Pttl { key: key("p") }),
            Ok(Reply::Integer(-1))
        );
        assert_eq!(
            evaluate(&storage, &Command::Ttl { key: key("t") }),
            Ok(Reply::Integer(10))
        );
        let Ok(Reply::Integer(ms)) = evaluate(&storage, &Command::Pttl { key: key("t") }) else {
            panic!("PTTL did not return an integer");
        };
        assert!(ms > 9_000 && ms <= 10_000);
    }

    #[test]
    fn test_refuses_writes() {
        let storage = StorageEngine::new();
        assert_eq!(
            evaluate(&storage, &Command::Incr { key: key("x") }),
            Err(CommandError::NotWatchable("incr".to_string()))
        );
        assert!(storage.is_empty());
    }
}
