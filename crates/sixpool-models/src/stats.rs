//! Pool and mirror statistics.

use serde::{Deserialize, Serialize};

/// Per-mirror lease-state counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Tenant name.
    pub dbname: String,
    /// Total addresses mirrored from the global pool.
    pub total: usize,
    /// Addresses available for lease.
    pub idle: usize,
    /// Addresses currently leased.
    pub using: usize,
    /// Addresses parked by client reports.
    pub unusable: usize,
}

/// Global pool statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Current /64 prefix, if one has been probed.
    pub prefix: Option<String>,
    /// Number of verified addresses in the global pool.
    pub total_addrs: usize,
    /// Pool size the maintenance loop aims for.
    pub usable_num_target: usize,
    /// Names of all known mirrors.
    pub mirrors: Vec<String>,
    /// False once the maintenance loop has given up after sustained
    /// spawn failures; the pool no longer replenishes itself.
    pub maintaining: bool,
}
