//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use sixpool_net::{check, DEFAULT_EXCLUDED_INTERFACES, DEFAULT_NDPPD_CONF};

/// Pool server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root directory for persisted pool state
    pub db_root: PathBuf,
    /// Global-pool size the maintenance loop aims for
    pub usable_num: usize,
    /// Echo service used for reachability checks
    pub check_url: String,
    /// Per-probe timeout
    pub check_timeout: Duration,
    /// Route monitor period
    pub route_check_interval: Duration,
    /// Maintenance loop period
    pub maintain_interval: Duration,
    /// How many times one candidate is re-checked before giving up on it
    pub spawn_max_retries: u32,
    /// Consecutive spawn failures tolerated before a batch stops early
    pub spawn_max_addrs: u32,
    /// ndppd config path
    pub ndppd_conf: PathBuf,
    /// Interface-name prefixes skipped during prefix probing
    pub exclude_interfaces: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8966,
            db_root: PathBuf::from("./data/ipv6"),
            usable_num: 10,
            check_url: check::DEFAULT_CHECK_URL.to_string(),
            check_timeout: check::DEFAULT_CHECK_TIMEOUT,
            route_check_interval: Duration::from_secs(60),
            maintain_interval: Duration::from_secs(10),
            spawn_max_retries: 100,
            spawn_max_addrs: 100,
            ndppd_conf: PathBuf::from(DEFAULT_NDPPD_CONF),
            exclude_interfaces: DEFAULT_EXCLUDED_INTERFACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            db_root: std::env::var("DB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_root),
            usable_num: std::env::var("USABLE_NUM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.usable_num),
            check_url: std::env::var("CHECK_URL").unwrap_or(defaults.check_url),
            check_timeout: env_secs("CHECK_TIMEOUT").unwrap_or(defaults.check_timeout),
            route_check_interval: env_secs("ROUTE_CHECK_INTERVAL")
                .unwrap_or(defaults.route_check_interval),
            maintain_interval: env_secs("MAINTAIN_INTERVAL").unwrap_or(defaults.maintain_interval),
            spawn_max_retries: std::env::var("SPAWN_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.spawn_max_retries),
            spawn_max_addrs: std::env::var("SPAWN_MAX_ADDRS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.spawn_max_addrs),
            ndppd_conf: std::env::var("NDPPD_CONF")
                .map(PathBuf::from)
                .unwrap_or(defaults.ndppd_conf),
            exclude_interfaces: std::env::var("EXCLUDE_INTERFACES")
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or(defaults.exclude_interfaces),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
