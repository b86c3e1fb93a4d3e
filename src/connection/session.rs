//! Per-client session state.
//!
//! A [`Session`] is transport agnostic: it takes one request (name plus
//! arguments) and returns the frame to send back. Besides plain commands it
//! understands the subscription verbs:
//!
//! - `<CMD>.WATCH args...` registers `<CMD> args...` as a live query and
//!   replies with the subscription id. The current result follows as a push.
//! - `UNWATCH id` removes one of this session's subscriptions.
//!
//! Dropping the session drops every subscription it still owns.

use crate::commands::{Command, CommandError};
use crate::database::Database;
use crate::protocol::RespValue;
use crate::storage::value::parse_canonical_i64;
use crate::subscription::{Push, SubscriberHandle, SubscriptionId};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Suffix that turns a read command into a subscription request.
pub const WATCH_SUFFIX: &str = ".WATCH";

/// What the transport must listen on besides the socket.
#[derive(Debug)]
pub struct PushStream {
    pub pushes: mpsc::Receiver<Push>,
    /// Becomes `true` if the session fell too far behind and was evicted.
    pub evicted: watch::Receiver<bool>,
}

pub struct Session {
    db: Arc<Database>,
    subscriber: SubscriberHandle,
    watching: HashSet<SubscriptionId>,
}

impl Session {
    pub fn open(db: Arc<Database>) -> (Self, PushStream) {
        let channel = db.open_subscriber();
        let session = Self {
            db,
            subscriber: channel.handle,
            watching: HashSet::new(),
        };
        let stream = PushStream {
            pushes: channel.pushes,
            evicted: channel.evicted,
        };
        (session, stream)
    }

    /// Handles one request and returns the reply frame.
    pub fn handle(&mut self, name: &str, args: &[Bytes]) -> RespValue {
        let result = if let Some(base) = strip_watch_suffix(name) {
            self.watch(base, args)
        } else if name.eq_ignore_ascii_case("UNWATCH") {
            self.unwatch(args)
        } else {
            self.db.execute(name, args).map(RespValue::from)
        };

        result.unwrap_or_else(|err| RespValue::from(&err))
    }

    /// Subscriptions this session currently owns.
    pub fn watching(&self) -> usize {
        self.watching.len()
    }

    fn watch(&mut self, base: &str, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let query = Command::parse(base, args)?;
        let id = self.db.subscribe(query, &self.subscriber)?;
        self.watching.insert(id);
        Ok(RespValue::Integer(id as i64))
    }

    fn unwatch(&mut self, args: &[Bytes]) -> Result<RespValue, CommandError> {
        let [id] = args else {
            return Err(CommandError::WrongArity("unwatch".to_string()));
        };
        let id = parse_canonical_i64(id)
            .and_then(|id| SubscriptionId::try_from(id).ok())
            .ok_or(CommandError::NotAnInteger)?;

        let removed = self.watching.remove(&id) && self.db.unsubscribe(id);
        Ok(RespValue::Integer(removed as i64))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let removed = self.db.drop_subscriber(self.subscriber.id());
        if removed > 0 {
            debug!(
                subscriber = self.subscriber.id(),
                subscriptions = removed,
                "Session closed, subscriptions dropped"
            );
        }
    }
}

fn strip_watch_suffix(name: &str) -> Option<&str> {
    let split = name.len().checked_sub(WATCH_SUFFIX.len())?;
    if !name.is_char_boundary(split) {
        return None;
    }
    let (base, suffix) = name.split_at(split);
    (!base.is_empty() && suffix.eq_ignore_ascii_case(WATCH_SUFFIX)).then_some(base)
}
