//! Expiry Manager
//!
//! Keys with a TTL are expired in two cooperating ways:
//!
//! 1. **Lazy**: every read, existence check and mutation asks [`is_expired`]
//!    before it looks at an entry. An expired entry is treated as absent from
//!    that instant on, whether or not it is still in memory. This is the only
//!    thing observable semantics depend on.
//! 2. **Active**: [`ExpirySweeper`] runs as a Tokio task that periodically
//!    removes expired entries, so keys that are never touched again do not
//!    hold memory forever. Removed keys are reported to an
//!    [`ExpiryListener`] so watchers of those keys get pushed.
//!
//! ## Adaptive Frequency
//!
//! If many keys are expiring, the sweeper runs more frequently.
//! If few keys are expiring, it backs off to save CPU.

use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Returns true if an entry with this deadline is logically gone at `now`.
///
/// A key set with a TTL of `n` is present strictly before `now + n` and
/// absent from that instant on.
#[inline]
pub fn is_expired(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_some_and(|deadline| now >= deadline)
}

/// Absolute deadline for a TTL starting now.
#[inline]
pub fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    // Absurd TTLs saturate to "practically never" instead of panicking
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(100 * 365 * 24 * 3600))
}

/// Receives the keys physically removed by the sweeper.
pub trait ExpiryListener: Send + Sync {
    fn keys_expired(&self, keys: &[Bytes]);
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Base interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of scanned keys are expired, speed up sweeping
    pub speedup_threshold: f64,

    /// If this fraction of scanned keys are expired, slow down sweeping
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// The sweeper is owned: dropping the handle (or calling [`stop`]) ends the
/// background task.
///
/// [`stop`]: ExpirySweeper::stop
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        engine: Arc<StorageEngine>,
        config: ExpiryConfig,
        listener: Option<Arc<dyn ExpiryListener>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(sweeper_loop(engine, config, listener, shutdown_rx));

        info!("Background expiry sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the sweeper to stop.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }

    /// Stops the sweeper and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    listener: Option<Arc<dyn ExpiryListener>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let outcome = engine.purge_expired();
        let expired = outcome.expired.len() as u64;

        if outcome.skipped_shards > 0 {
            trace!(
                skipped = outcome.skipped_shards,
                "Busy shards skipped, retrying next sweep"
            );
        }

        if keys_before > 0 {
            let expiry_rate = expired as f64 / keys_before as f64;

            if expiry_rate > config.speedup_threshold {
                current_interval = (current_interval / 2).max(config.min_interval);
                debug!(
                    expired = expired,
                    rate = %format!("{:.2}%", expiry_rate * 100.0),
                    new_interval_ms = current_interval.as_millis(),
                    "High expiry rate, speeding up sweeper"
                );
            } else if expiry_rate < config.slowdown_threshold && expired == 0 {
                current_interval = (current_interval * 2).min(config.max_interval);
                trace!(
                    new_interval_ms = current_interval.as_millis(),
                    "Low expiry rate, slowing down sweeper"
                );
            }
        }

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
            if let Some(listener) = &listener {
                listener.keys_expired(&outcome.expired);
            }
        }
    }
}
