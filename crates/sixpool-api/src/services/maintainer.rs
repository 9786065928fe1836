//! Background service that keeps the global pool at its target size.
//!
//! Every tick it compares the pool against `usable_num` and spawns the
//! difference. When a batch reports the consecutive-failure cutoff, the
//! loop terminates permanently: sustained failure across that many
//! candidates means external connectivity is gone, and burning probes
//! against a dead uplink helps nobody. A prefix-change event or an
//! operator restart brings replenishment back.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

use crate::pool::PoolService;

/// Pool replenishment service.
pub struct AddrMaintainer {
    pool: Arc<PoolService>,
    shutdown: watch::Receiver<bool>,
}

impl AddrMaintainer {
    pub fn new(pool: Arc<PoolService>, shutdown: watch::Receiver<bool>) -> Self {
        Self { pool, shutdown }
    }

    /// Run the maintenance loop until cutoff or shutdown.
    ///
    /// Spawned as a background task. Shutdown is honored at every await;
    /// a final save runs before the task exits.
    ///
    /// Consecutive failures accumulate across batches: a small top-up
    /// batch cannot reach the cutoff on its own, but ten fully-failed
    /// batches of ten are the same dead uplink as one of a hundred.
    pub async fn run(mut self) {
        let period = self.pool.config().maintain_interval;
        let cutoff = self.pool.config().spawn_max_addrs as usize;
        info!(period = ?period, "starting address maintainer");

        let mut ticker = interval(period);
        let mut consecutive_failures: usize = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => break,
            }

            let have = self.pool.global_len();
            let target = self.pool.config().usable_num;
            if have >= target {
                continue;
            }

            let need = target - have;
            info!(have, target, need, "replenishing address pool");

            let (spawned, should_stop) = tokio::select! {
                result = self.pool.spawn_many(need) => result,
                _ = self.shutdown.changed() => break,
            };

            if let Err(e) = self.pool.save_all().await {
                warn!(error = %e, "post-batch save failed");
            }

            if spawned.is_empty() {
                consecutive_failures += need;
            } else {
                consecutive_failures = 0;
            }

            if should_stop || consecutive_failures >= cutoff {
                warn!(
                    spawned = spawned.len(),
                    need,
                    consecutive_failures,
                    "maintenance terminated: consecutive spawn failures hit the limit; \
                     external connectivity is likely down"
                );
                self.pool.set_maintaining(false);
                return;
            }
        }

        info!("address maintainer cancelled");
        if let Err(e) = self.pool.save_all().await {
            warn!(error = %e, "final save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::pool::tests::{test_config, test_prefix, RecordingRunner, StaticChecker};

    fn pool_with(checker: Arc<dyn sixpool_net::AddrChecker>, dir: &std::path::Path) -> Arc<PoolService> {
        Arc::new(PoolService::new(
            test_config(dir),
            test_prefix(),
            checker,
            RecordingRunner::new(),
        ))
    }

    #[tokio::test]
    async fn test_maintainer_fills_pool_to_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = pool_with(StaticChecker::accepting(), dir.path());
        let (_tx, rx) = watch::channel(false);

        let handle = tokio::spawn(AddrMaintainer::new(Arc::clone(&pool), rx).run());

        // First tick fires immediately and tops the pool up.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if pool.global_len() >= pool.config().usable_num {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pool never reached target");

        assert!(pool.is_maintaining());
        handle.abort();
    }

    #[tokio::test]
    async fn test_maintainer_terminates_after_cutoff() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = pool_with(StaticChecker::rejecting(), dir.path());
        let (_tx, rx) = watch::channel(false);

        let handle = tokio::spawn(AddrMaintainer::new(Arc::clone(&pool), rx).run());

        // The task must end on its own once the cutoff is hit.
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("maintainer did not terminate")
            .unwrap();

        assert!(!pool.is_maintaining());
        assert_eq!(pool.global_len(), 0);
        assert_eq!(pool.global_stats().total_addrs, 0);
        assert!(!pool.global_stats().maintaining);
    }

    #[tokio::test]
    async fn test_maintainer_accumulates_failures_across_small_batches() {
        let dir = tempfile::TempDir::new().unwrap();
        // Target smaller than the cutoff: no single batch can hit it.
        let mut config = test_config(dir.path());
        config.usable_num = 2;
        let pool = Arc::new(PoolService::new(
            config,
            test_prefix(),
            StaticChecker::rejecting(),
            RecordingRunner::new(),
        ));
        let (_tx, rx) = watch::channel(false);

        let handle = tokio::spawn(AddrMaintainer::new(Arc::clone(&pool), rx).run());

        // Batches of 2 failures accumulate to the cutoff of 4.
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("maintainer did not terminate")
            .unwrap();

        assert!(!pool.is_maintaining());
        assert_eq!(pool.global_len(), 0);
    }

    #[tokio::test]
    async fn test_maintainer_stops_on_shutdown_and_saves() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = pool_with(StaticChecker::accepting(), dir.path());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(AddrMaintainer::new(Arc::clone(&pool), rx).run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("maintainer ignored shutdown")
            .unwrap();

        // The final save leaves the global document on disk.
        assert!(dir.path().join(sixpool_store::GLOBAL_DB_FILE).exists());
    }
}
