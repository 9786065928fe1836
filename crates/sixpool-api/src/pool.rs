//! The pool orchestrator.
//!
//! [`PoolService`] ties the stores, the checker and the route effector
//! together: it spawns and verifies candidate addresses under the current
//! prefix, keeps every tenant mirror synced with the global pool, serves
//! the lease protocol, and reconciles routes when the prefix moves.
//!
//! Locking: the mirrors-map mutex may be taken before an individual
//! mirror's lock, never the other way around; no lock is held across a
//! reachability check or a privileged command.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use sixpool_models::{is_valid_dbname, AddrReport, GlobalStats, MirrorStats};
use sixpool_net::route::CommandRunner;
use sixpool_net::{probe_prefix, random_addr, AddrChecker, PrefixInfo, RouteEffector};
use sixpool_store::{GlobalPool, Mirror, StoreResult, MIRROR_DB_DIR};

use crate::config::ServerConfig;
use crate::metrics as m;

/// Orchestrates the global pool, tenant mirrors and route state.
pub struct PoolService {
    config: ServerConfig,
    global: GlobalPool,
    mirrors: Mutex<HashMap<String, Arc<Mirror>>>,
    prefix: Mutex<PrefixInfo>,
    checker: Arc<dyn AddrChecker>,
    runner: Arc<dyn CommandRunner>,
    maintaining: AtomicBool,
}

impl PoolService {
    /// Build the service over `config.db_root`, loading persisted state.
    ///
    /// Mirrors found on disk are reopened immediately so `/stats` sees
    /// them before their tenants reconnect. When the persisted prefix
    /// does not match the probed one, every store is flushed up front:
    /// addresses from a previous prefix are unreachable and must not be
    /// leased.
    pub fn new(
        config: ServerConfig,
        prefix: PrefixInfo,
        checker: Arc<dyn AddrChecker>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let global = GlobalPool::open(&config.db_root);
        let service = Self {
            global,
            mirrors: Mutex::new(HashMap::new()),
            prefix: Mutex::new(prefix.clone()),
            checker,
            runner,
            maintaining: AtomicBool::new(true),
            config,
        };

        service.load_existing_mirrors();

        if let Some(stored) = service.global.prefix() {
            if stored != prefix.prefix {
                warn!(
                    stored = %stored,
                    probed = %prefix.prefix,
                    "persisted prefix is stale, flushing all stores"
                );
                if let Err(e) = service.flush(None) {
                    warn!(error = %e, "flush of stale stores failed");
                }
            }
        }
        service.global.set_prefix(&prefix.prefix);
        m::set_pool_size(service.global.len());

        service
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn load_existing_mirrors(&self) {
        let dir = self.config.db_root.join(MIRROR_DB_DIR);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_valid_dbname(stem) {
                self.mirror(stem);
            }
        }
    }

    /// Get or lazily create the mirror for `dbname`.
    ///
    /// New mirrors are synced from the global pool before first use, so
    /// a tenant's first `pick` already sees every verified address.
    pub fn mirror(&self, dbname: &str) -> Arc<Mirror> {
        let mut mirrors = self.mirrors.lock().unwrap();
        if let Some(mirror) = mirrors.get(dbname) {
            return Arc::clone(mirror);
        }
        let mirror = Arc::new(Mirror::open(&self.config.db_root, dbname));
        mirror.sync_from_global(&self.global.list());
        info!(dbname, "created mirror");
        mirrors.insert(dbname.to_string(), Arc::clone(&mirror));
        mirror
    }

    fn mirrors_snapshot(&self) -> Vec<Arc<Mirror>> {
        self.mirrors.lock().unwrap().values().cloned().collect()
    }

    fn sync_all_mirrors(&self) {
        let globals = self.global.list();
        for mirror in self.mirrors_snapshot() {
            mirror.sync_from_global(&globals);
        }
    }

    /// Current prefix string.
    pub fn current_prefix(&self) -> String {
        self.prefix.lock().unwrap().prefix.clone()
    }

    /// Check an arbitrary address against the reachability oracle.
    pub async fn check_addr(&self, addr: &str) -> bool {
        self.checker.check(addr).await
    }

    /// Spawn one address: generate a candidate under the current prefix
    /// and verify it, retrying the *same* candidate up to the configured
    /// budget. Failures are assumed transient (the network, not the
    /// address), which is why the candidate is not resampled.
    ///
    /// On success the address is admitted to the global pool and every
    /// mirror is re-synced.
    pub async fn spawn_one(&self) -> Option<String> {
        let addr = random_addr(&self.current_prefix());

        for attempt in 1..=self.config.spawn_max_retries {
            m::record_spawn_attempt();
            if self.checker.check(&addr).await {
                if self.global.add(&addr) {
                    m::record_addr_spawned();
                    m::set_pool_size(self.global.len());
                }
                self.sync_all_mirrors();
                info!(addr = %addr, attempt, "spawned address");
                return Some(addr);
            }
            debug!(addr = %addr, attempt, max = self.config.spawn_max_retries, "check failed");
        }

        warn!(
            addr = %addr,
            retries = self.config.spawn_max_retries,
            "spawn gave up on candidate"
        );
        None
    }

    /// Spawn up to `num` addresses.
    ///
    /// Returns the admitted addresses and a stop flag that is true when
    /// the batch hit `spawn_max_addrs` consecutive failures. Sustained
    /// failure across that many distinct candidates means the uplink is
    /// down, not that we are unlucky.
    pub async fn spawn_many(&self, num: usize) -> (Vec<String>, bool) {
        let mut addrs = Vec::new();
        let mut fails: u32 = 0;

        for _ in 0..num {
            match self.spawn_one().await {
                Some(addr) => {
                    addrs.push(addr);
                    fails = 0;
                }
                None => {
                    fails += 1;
                    if fails >= self.config.spawn_max_addrs {
                        warn!(fails, "spawn batch stopped at consecutive-failure limit");
                        return (addrs, true);
                    }
                }
            }
        }

        (addrs, false)
    }

    /// Lease an idle address from a tenant's mirror.
    pub fn pick(&self, dbname: &str) -> Option<String> {
        let addr = self.mirror(dbname).acquire_idle();
        match &addr {
            Some(addr) => {
                m::record_pick(true);
                debug!(dbname, addr = %addr, "picked address");
            }
            None => m::record_pick(false),
        }
        addr
    }

    /// Lease up to `num` idle addresses, stopping at the first miss.
    pub fn pick_many(&self, dbname: &str, num: usize) -> Vec<String> {
        let mut addrs = Vec::new();
        for _ in 0..num {
            match self.pick(dbname) {
                Some(addr) => addrs.push(addr),
                None => break,
            }
        }
        addrs
    }

    /// Apply a client status report to a tenant's mirror.
    pub fn report(&self, dbname: &str, report: &AddrReport) {
        self.mirror(dbname).release(report);
        m::record_report(report.status.as_str());
        debug!(dbname, addr = %report.addr, status = %report.status, "reported address");
    }

    pub fn report_many(&self, dbname: &str, reports: &[AddrReport]) {
        for report in reports {
            self.report(dbname, report);
        }
    }

    /// Persist the global pool and every known mirror. All stores are
    /// attempted; the first error is returned after the rest complete.
    pub fn save_sync(&self) -> StoreResult<()> {
        let mut first_err = None;
        if let Err(e) = self.global.save() {
            warn!(error = %e, "global pool save failed");
            first_err = Some(e);
        }
        for mirror in self.mirrors_snapshot() {
            if let Err(e) = mirror.save() {
                warn!(dbname = %mirror.dbname(), error = %e, "mirror save failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Reload the global pool and every known mirror from disk.
    pub fn load_sync(&self) {
        self.global.load();
        for mirror in self.mirrors_snapshot() {
            mirror.load();
        }
        m::set_pool_size(self.global.len());
    }

    /// `save_sync` moved off the scheduler thread.
    pub async fn save_all(self: &Arc<Self>) -> StoreResult<()> {
        let pool = Arc::clone(self);
        match tokio::task::spawn_blocking(move || pool.save_sync()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "save task aborted");
                Ok(())
            }
        }
    }

    /// Flush stores.
    ///
    /// With no name, the global pool and every mirror are emptied. With a
    /// name, only that mirror is emptied and then re-synced from global,
    /// so its addresses come back as fresh `Idle` records.
    pub fn flush(&self, dbname: Option<&str>) -> StoreResult<()> {
        match dbname {
            None => {
                self.global.flush()?;
                for mirror in self.mirrors_snapshot() {
                    mirror.flush()?;
                }
                m::set_pool_size(0);
            }
            Some(name) => {
                let mirror = self.mirror(name);
                mirror.flush()?;
                mirror.sync_from_global(&self.global.list());
                mirror.save()?;
            }
        }
        Ok(())
    }

    /// Whether the maintenance loop is still replenishing the pool.
    pub fn is_maintaining(&self) -> bool {
        self.maintaining.load(Ordering::Relaxed)
    }

    pub fn set_maintaining(&self, active: bool) {
        self.maintaining.store(active, Ordering::Relaxed);
    }

    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    pub fn global_stats(&self) -> GlobalStats {
        let mut mirrors: Vec<String> = self
            .mirrors
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        mirrors.sort();
        GlobalStats {
            prefix: self.global.prefix(),
            total_addrs: self.global.len(),
            usable_num_target: self.config.usable_num,
            mirrors,
            maintaining: self.is_maintaining(),
        }
    }

    pub fn mirror_stats(&self, dbname: &str) -> MirrorStats {
        self.mirror(dbname).stats()
    }

    fn effector_for(&self, info: &PrefixInfo) -> RouteEffector {
        RouteEffector::new(info)
            .with_conf(&self.config.ndppd_conf)
            .with_runner(Arc::clone(&self.runner))
    }

    /// Install the route and reconcile ndppd for the current prefix.
    /// Called once at startup so a fresh host converges immediately.
    pub async fn ensure_route(&self) -> anyhow::Result<()> {
        let info = self.prefix.lock().unwrap().clone();
        self.effector_for(&info).run(false).await?;
        Ok(())
    }

    /// Re-probe the prefix and, when it moved, switch the whole system
    /// over to it. No-op while the prefix is stable.
    pub async fn reconcile_route(&self) -> anyhow::Result<()> {
        let probed = probe_prefix(&self.config.exclude_interfaces)?;
        let current = self.prefix.lock().unwrap().prefix.clone();
        if probed.prefix == current {
            return Ok(());
        }
        self.apply_prefix_change(probed).await
    }

    /// Switch to a new prefix: update stored prefixes, reconcile route
    /// and ndppd, then flush every store. Addresses under the old prefix
    /// are unreachable the moment the prefix moves.
    pub async fn apply_prefix_change(&self, probed: PrefixInfo) -> anyhow::Result<()> {
        {
            let mut prefix = self.prefix.lock().unwrap();
            info!(
                old = %prefix.prefix,
                new = %probed.prefix,
                interface = %probed.interface,
                "IPv6 prefix changed"
            );
            *prefix = probed.clone();
        }
        self.global.set_prefix(&probed.prefix);

        self.effector_for(&probed).run(false).await?;

        self.flush(None)?;
        info!("flushed all stores after prefix change");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use sixpool_models::AddrStatus;
    use sixpool_net::NetResult;

    /// Checker with a fixed verdict and an attempt counter.
    pub(crate) struct StaticChecker {
        accept: bool,
        calls: AtomicU32,
    }

    impl StaticChecker {
        pub(crate) fn accepting() -> Arc<Self> {
            Arc::new(Self {
                accept: true,
                calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                accept: false,
                calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl AddrChecker for StaticChecker {
        async fn check(&self, _addr: &str) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.accept
        }
    }

    /// Runner that records commands and emulates the file operations the
    /// effector needs.
    pub(crate) struct RecordingRunner {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run_privileged(&self, program: &str, args: &[&str]) -> NetResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            match program {
                "cp" => {
                    std::fs::copy(args[0], args[1])?;
                }
                "mv" => {
                    std::fs::rename(args[0], args[1])?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    pub(crate) fn test_config(db_root: &std::path::Path) -> ServerConfig {
        ServerConfig {
            db_root: db_root.to_path_buf(),
            ndppd_conf: db_root.join("ndppd.conf"),
            spawn_max_retries: 3,
            spawn_max_addrs: 4,
            usable_num: 10,
            maintain_interval: Duration::from_millis(10),
            route_check_interval: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    pub(crate) fn test_prefix() -> PrefixInfo {
        PrefixInfo {
            interface: "eth0".into(),
            prefix: "2001:db8:1:2".into(),
            prefix_bits: 64,
        }
    }

    fn service(dir: &std::path::Path, checker: Arc<dyn AddrChecker>) -> PoolService {
        PoolService::new(
            test_config(dir),
            test_prefix(),
            checker,
            RecordingRunner::new(),
        )
    }

    #[tokio::test]
    async fn test_spawn_one_admits_and_syncs_mirrors() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = service(dir.path(), StaticChecker::accepting());
        pool.mirror("default");

        let addr = pool.spawn_one().await.unwrap();
        assert!(addr.starts_with("2001:db8:1:2:"));
        assert_eq!(pool.global_len(), 1);
        assert_eq!(pool.mirror_stats("default").total, 1);
        assert_eq!(pool.mirror_stats("default").idle, 1);
    }

    #[tokio::test]
    async fn test_spawn_one_exhausts_retry_budget() {
        let dir = tempfile::TempDir::new().unwrap();
        let checker = StaticChecker::rejecting();
        let pool = service(dir.path(), checker.clone());

        assert!(pool.spawn_one().await.is_none());
        // Exactly spawn_max_retries probes of the same candidate.
        assert_eq!(checker.calls(), 3);
        assert_eq!(pool.global_len(), 0);
    }

    #[tokio::test]
    async fn test_spawn_many_stops_at_consecutive_failure_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let checker = StaticChecker::rejecting();
        let pool = service(dir.path(), checker.clone());

        let (addrs, stopped) = pool.spawn_many(50).await;
        assert!(addrs.is_empty());
        assert!(stopped);
        // spawn_max_addrs candidates, each probed spawn_max_retries times.
        assert_eq!(checker.calls(), 4 * 3);
    }

    #[tokio::test]
    async fn test_spawn_many_below_limit_does_not_stop() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = service(dir.path(), StaticChecker::rejecting());

        let (addrs, stopped) = pool.spawn_many(2).await;
        assert!(addrs.is_empty());
        assert!(!stopped);
    }

    #[tokio::test]
    async fn test_pick_and_report_lifecycle() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = service(dir.path(), StaticChecker::accepting());

        let (spawned, _) = pool.spawn_many(3).await;
        assert_eq!(spawned.len(), 3);

        let picked = pool.pick_many("default", 10);
        assert_eq!(picked.len(), 3);
        assert!(pool.pick("default").is_none());

        // Returning one address makes it leasable again.
        pool.report(
            "default",
            &AddrReport::new(picked[0].clone(), AddrStatus::Idle),
        );
        assert_eq!(pool.pick("default").as_ref(), Some(&picked[0]));

        // Parking it takes it out of rotation.
        pool.report(
            "default",
            &AddrReport::new(picked[0].clone(), AddrStatus::Unusable),
        );
        assert!(pool.pick("default").is_none());
        let stats = pool.mirror_stats("default");
        assert_eq!(stats.unusable, 1);
        assert_eq!(stats.using, 2);
        assert_eq!(stats.total, stats.idle + stats.using + stats.unusable);
    }

    #[tokio::test]
    async fn test_mirrors_are_independent() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = service(dir.path(), StaticChecker::accepting());
        pool.spawn_many(2).await;

        let a = pool.pick("tenant-a").unwrap();
        // tenant-b's view is untouched by tenant-a's lease.
        assert_eq!(pool.mirror_stats("tenant-b").idle, 2);
        assert_eq!(pool.mirror_stats("tenant-a").using, 1);

        pool.report("tenant-b", &AddrReport::new(a, AddrStatus::Unusable));
        assert_eq!(pool.mirror_stats("tenant-a").using, 1);
        assert_eq!(pool.mirror_stats("tenant-b").unusable, 1);
    }

    #[tokio::test]
    async fn test_concurrent_pickers_get_distinct_addrs() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = Arc::new(service(dir.path(), StaticChecker::accepting()));
        pool.spawn_many(10).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.pick("x") }));
        }

        let mut granted = Vec::new();
        let mut misses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Some(addr) => granted.push(addr),
                None => misses += 1,
            }
        }

        assert_eq!(granted.len(), 10);
        assert_eq!(misses, 40);
        let unique: HashSet<_> = granted.iter().collect();
        assert_eq!(unique.len(), 10, "an address was leased twice");
    }

    #[tokio::test]
    async fn test_prefix_change_flushes_everything() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let pool = PoolService::new(
            test_config(dir.path()),
            test_prefix(),
            StaticChecker::accepting(),
            runner.clone(),
        );

        pool.spawn_many(2).await;
        pool.pick("default");
        assert_eq!(pool.global_len(), 2);

        let new_prefix = PrefixInfo {
            interface: "eth0".into(),
            prefix: "2001:db8:1:3".into(),
            prefix_bits: 64,
        };
        // Pre-write a current config so run() skips the restart grace.
        std::fs::write(
            dir.path().join("ndppd.conf"),
            "proxy eth0 {\n    rule 2001:db8:1:3::/64 {\n        static\n    }\n}\n",
        )
        .unwrap();

        pool.apply_prefix_change(new_prefix).await.unwrap();

        assert_eq!(pool.global_len(), 0);
        assert_eq!(pool.mirror_stats("default").total, 0);
        assert_eq!(pool.current_prefix(), "2001:db8:1:3");
        assert!(runner
            .calls()
            .contains(&"ip route replace local 2001:db8:1:3::/64 dev eth0".to_string()));

        // New spawns land under the new prefix.
        let addr = pool.spawn_one().await.unwrap();
        assert!(addr.starts_with("2001:db8:1:3:"));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let unusable_addr;
        {
            let pool = service(dir.path(), StaticChecker::accepting());
            pool.spawn_many(3).await;
            let picked = pool.pick("default").unwrap();
            pool.report(
                "default",
                &AddrReport::new(picked.clone(), AddrStatus::Unusable),
            );
            unusable_addr = picked;
            pool.save_sync().unwrap();
        }

        let reopened = service(dir.path(), StaticChecker::accepting());
        assert_eq!(reopened.global_len(), 3);
        let stats = reopened.mirror_stats("default");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unusable, 1);
        // The parked address stays parked across the restart.
        for _ in 0..3 {
            if let Some(addr) = reopened.pick("default") {
                assert_ne!(addr, unusable_addr);
            }
        }
    }

    #[tokio::test]
    async fn test_stale_persisted_prefix_is_flushed_at_startup() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let pool = service(dir.path(), StaticChecker::accepting());
            pool.spawn_many(2).await;
            pool.save_sync().unwrap();
        }

        let moved = PrefixInfo {
            interface: "eth0".into(),
            prefix: "2001:db8:9:9".into(),
            prefix_bits: 64,
        };
        let reopened = PoolService::new(
            test_config(dir.path()),
            moved,
            StaticChecker::accepting(),
            RecordingRunner::new(),
        );
        assert_eq!(reopened.global_len(), 0);
        assert_eq!(reopened.mirror_stats("default").total, 0);
    }

    #[tokio::test]
    async fn test_flush_named_mirror_resyncs_from_global() {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = service(dir.path(), StaticChecker::accepting());
        pool.spawn_many(2).await;

        pool.pick("default");
        pool.flush(Some("default")).unwrap();

        // Flushed mirror comes back fully idle, same membership.
        let stats = pool.mirror_stats("default");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(pool.global_len(), 2);
    }
}
