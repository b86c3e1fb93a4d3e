//! Client Connections
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener (main.rs)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept() + spawn per client
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │   socket bytes ──> RESP frames ──> Session ──> Database     │
//! │   socket bytes <── replies + pushes <───────────────────────│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `handler`: the TCP read/write loop and connection stats
//! - `session`: per-client command routing, `.WATCH` and `UNWATCH`

pub mod handler;
pub mod session;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use session::{PushStream, Session};
