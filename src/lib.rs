//! # LiveKV - An In-Memory Key-Value Store with Live Queries
//!
//! LiveKV speaks the Redis wire protocol (RESP2) and adds reactive reads: a
//! client can register `GET`, `EXISTS` or `TYPE` as a watched query and the
//! server pushes the new result every time it changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                LiveKV                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Session   │                  │
//! │  │ (Listener)  │    │  Handler    │<─┐ │ .WATCH/UNWAT│                  │
//! │  └─────────────┘    └─────────────┘  │ └──────┬──────┘                  │
//! │                                      │        ▼                         │
//! │                              pushes  │ ┌─────────────┐  ┌────────────┐  │
//! │                                      │ │  Command    │─>│  Mutation  │  │
//! │                                      │ │  Executor   │  │  Notifier  │  │
//! │                                      │ └──────┬──────┘  └─────┬──────┘  │
//! │                                      │        ▼               ▼         │
//! │                                      │ ┌─────────────┐  ┌────────────┐  │
//! │                                      │ │  Storage    │<─│Subscription│  │
//! │                                      └─│  Engine     │  │  Engine    │  │
//! │                                        │ (64 shards) │  └────────────┘  │
//! │                                        └──────▲──────┘        ▲         │
//! │                                               │               │         │
//! │                                        ┌──────┴───────────────┴──────┐  │
//! │                                        │   ExpirySweeper (Tokio)     │  │
//! │                                        └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Embedding
//!
//! ```ignore
//! use livekv::{Database, EngineConfig};
//! use livekv::commands::Command;
//! use bytes::Bytes;
//!
//! let db = Database::start(EngineConfig::default());
//! let mut channel = db.open_subscriber();
//! let query = Command::parse("GET", &[Bytes::from("user")])?;
//! db.subscribe(query, &channel.handle)?;
//!
//! db.execute("SET", &[Bytes::from("user"), Bytes::from("ann")])?;
//! let push = channel.pushes.recv().await;
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: sharded keyspace with lazy and active expiry
//! - [`commands`]: command parsing, execution and typed replies
//! - [`subscription`]: watched queries and push delivery
//! - [`database`]: the engine facade tying the above together
//! - [`protocol`]: RESP2 encoding and decoding
//! - [`connection`]: TCP sessions
//! - [`config`]: command-line and environment configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod database;
pub mod protocol;
pub mod storage;
pub mod subscription;

pub use commands::{Command, CommandError, CommandExecutor, Reply};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use database::{Database, EngineConfig};
pub use protocol::{ParseError, RespValue};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
pub use subscription::{Push, SubscriptionEngine};

/// The default port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
