//! Command Layer
//!
//! Sits between the transport and the keyspace:
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │  name + args
//!          ▼
//! ┌─────────────────┐
//! │ Command::parse  │  arity and argument validation
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ CommandExecutor │ ───> │ MutationNotifier │
//! └────────┬────────┘      └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds | KEEPTTL] [NX | XX]`
//! - `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`
//! - `EXPIRE`, `PERSIST`, `TTL`, `PTTL`, `TYPE`
//! - `DBSIZE`, `FLUSHDB` (`FLUSHALL`)

pub mod command;
pub mod error;
pub mod executor;
pub mod query;
pub mod reply;

pub use command::Command;
pub use error::CommandError;
pub use executor::CommandExecutor;
pub use reply::Reply;
