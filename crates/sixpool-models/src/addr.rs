//! Address records and lease status.
//!
//! Two stores share these types: the global pool holds one
//! [`GlobalAddrRecord`] per verified address, and each tenant mirror holds
//! one [`MirrorAddrRecord`] per (tenant, address) pair with its own lease
//! state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lease state of an address within one mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddrStatus {
    /// Usable and not currently leased.
    #[default]
    Idle,
    /// Currently leased to a client.
    Using,
    /// Reported unusable by a client; parked until re-reported or removed.
    Unusable,
}

impl AddrStatus {
    /// Wire/disk representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddrStatus::Idle => "idle",
            AddrStatus::Using => "using",
            AddrStatus::Unusable => "unusable",
        }
    }
}

impl std::fmt::Display for AddrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One verified address in the global pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAddrRecord {
    /// The IPv6 address literal.
    pub addr: String,
    /// When the address was admitted to the pool.
    pub created_at: DateTime<Utc>,
}

impl GlobalAddrRecord {
    /// Create a record stamped with the current time.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            created_at: Utc::now(),
        }
    }
}

/// One address as seen by a single tenant mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorAddrRecord {
    /// The IPv6 address literal.
    pub addr: String,
    /// Current lease state.
    pub status: AddrStatus,
    /// Most recent idle-to-using transition, if any.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Number of successful leases over the record's lifetime.
    pub use_count: u64,
}

impl MirrorAddrRecord {
    /// Fresh record for an address newly synced from the global pool.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            status: AddrStatus::Idle,
            last_used_at: None,
            use_count: 0,
        }
    }

    /// Transition the record to `Using`, stamping the lease time and
    /// bumping the use counter. Caller must hold the mirror lock.
    pub fn mark_used(&mut self) {
        self.status = AddrStatus::Using;
        self.last_used_at = Some(Utc::now());
        self.use_count += 1;
    }
}

/// Status report sent by a lease holder when it is done with an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrReport {
    /// The address being reported.
    pub addr: String,
    /// The status the client assigns to it.
    pub status: AddrStatus,
    /// Client-side report timestamp. Informational; the server ignores it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_at: Option<DateTime<Utc>>,
}

impl AddrReport {
    /// Build a report stamped with the current time.
    pub fn new(addr: impl Into<String>, status: AddrStatus) -> Self {
        Self {
            addr: addr.into(),
            status,
            report_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_literals() {
        assert_eq!(serde_json::to_string(&AddrStatus::Idle).unwrap(), "\"idle\"");
        assert_eq!(serde_json::to_string(&AddrStatus::Using).unwrap(), "\"using\"");
        assert_eq!(
            serde_json::to_string(&AddrStatus::Unusable).unwrap(),
            "\"unusable\""
        );

        let parsed: AddrStatus = serde_json::from_str("\"using\"").unwrap();
        assert_eq!(parsed, AddrStatus::Using);
    }

    #[test]
    fn test_mark_used_transitions() {
        let mut record = MirrorAddrRecord::new("2001:db8:1:2::1");
        assert_eq!(record.status, AddrStatus::Idle);
        assert_eq!(record.use_count, 0);
        assert!(record.last_used_at.is_none());

        record.mark_used();
        assert_eq!(record.status, AddrStatus::Using);
        assert_eq!(record.use_count, 1);
        assert!(record.last_used_at.is_some());

        record.status = AddrStatus::Idle;
        record.mark_used();
        assert_eq!(record.use_count, 2);
    }

    #[test]
    fn test_report_without_timestamp_deserializes() {
        let report: AddrReport =
            serde_json::from_str(r#"{"addr":"2001:db8::1","status":"unusable"}"#).unwrap();
        assert_eq!(report.status, AddrStatus::Unusable);
        assert!(report.report_at.is_none());
    }
}
