//! Server configuration.
//!
//! Every flag can also be set through a `LIVEKV_*` environment variable;
//! the flag wins when both are given.

use crate::database::EngineConfig;
use crate::storage::ExpiryConfig;
use crate::subscription::SubscriptionConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "livekv", version, about = "In-memory key-value server with live queries")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long, env = "LIVEKV_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "LIVEKV_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Starting interval of the expiry sweeper, in milliseconds
    #[arg(long, env = "LIVEKV_SWEEP_INTERVAL_MS", default_value_t = 100)]
    pub sweep_interval_ms: u64,

    /// Shortest sweeper interval under heavy expiry
    #[arg(long, env = "LIVEKV_SWEEP_MIN_INTERVAL_MS", default_value_t = 10)]
    pub sweep_min_interval_ms: u64,

    /// Longest sweeper interval when nothing expires
    #[arg(long, env = "LIVEKV_SWEEP_MAX_INTERVAL_MS", default_value_t = 1000)]
    pub sweep_max_interval_ms: u64,

    /// Pushes a client may have queued before it is disconnected
    #[arg(long, env = "LIVEKV_PUSH_BUFFER", default_value_t = 1024,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub push_buffer: u64,

    /// Log filter used when RUST_LOG is not set (e.g. `info`, `livekv=debug`)
    #[arg(long, env = "LIVEKV_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine settings derived from the flags.
    pub fn engine(&self) -> EngineConfig {
        let min = Duration::from_millis(self.sweep_min_interval_ms.max(1));
        let max = Duration::from_millis(self.sweep_max_interval_ms).max(min);
        let base = Duration::from_millis(self.sweep_interval_ms).clamp(min, max);

        EngineConfig {
            expiry: ExpiryConfig {
                base_interval: base,
                min_interval: min,
                max_interval: max,
                ..Default::default()
            },
            subscriptions: SubscriptionConfig {
                push_buffer: self.push_buffer as usize,
            },
        }
    }
}
