//! Background service that watches the host prefix.
//!
//! ISP-delegated prefixes move. Every tick the monitor re-probes the
//! interfaces and, when the prefix has changed, drives the pool through
//! its reconciliation: route + ndppd for the new prefix, then a full
//! flush of now-unreachable addresses. Errors never kill the loop; the
//! next tick retries.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::pool::PoolService;

/// Prefix-change watcher.
pub struct RouteMonitor {
    pool: Arc<PoolService>,
    shutdown: watch::Receiver<bool>,
}

impl RouteMonitor {
    pub fn new(pool: Arc<PoolService>, shutdown: watch::Receiver<bool>) -> Self {
        Self { pool, shutdown }
    }

    /// Run the monitor loop until shutdown.
    pub async fn run(mut self) {
        let period = self.pool.config().route_check_interval;
        info!(period = ?period, "starting route monitor");

        let mut ticker = interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => break,
            }

            if let Err(e) = self.pool.reconcile_route().await {
                warn!(error = %e, "route reconciliation failed");
            }
        }

        info!("route monitor cancelled");
        if let Err(e) = self.pool.save_all().await {
            warn!(error = %e, "final save failed");
        }
    }
}
