//! Request and response envelopes for the lease HTTP API.
//!
//! Kept in the leaf crate so the server handlers and the client library
//! share one definition of the wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addr::AddrReport;

/// Response for `GET /spawn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Present on failure. The server cannot tell an unlucky candidate
    /// from a dead uplink; the reason says what it knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response for `GET /spawns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnManyResponse {
    pub success: bool,
    pub addrs: Vec<String>,
    /// True when the batch hit the consecutive-failure cutoff and the
    /// server stopped early.
    #[serde(default)]
    pub stopped: bool,
}

/// Response for `GET /pick`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    pub dbname: String,
}

/// Response for `GET /picks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicksResponse {
    pub success: bool,
    pub addrs: Vec<String>,
    pub dbname: String,
}

/// Response for `GET /check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub success: bool,
    pub addr: String,
    pub usable: bool,
}

/// Response for `GET /checks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksResponse {
    pub success: bool,
    /// Per-address reachability verdicts, keyed by the queried literals.
    pub results: BTreeMap<String, bool>,
}

/// Body for `POST /report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(default = "default_dbname")]
    pub dbname: String,
    pub report_info: AddrReport,
}

/// Body for `POST /reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsRequest {
    #[serde(default = "default_dbname")]
    pub dbname: String,
    pub report_infos: Vec<AddrReport>,
}

/// Response for `POST /report` and `POST /reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAck {
    pub success: bool,
    pub dbname: String,
}

/// Response for `POST /save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
}

/// Response for `POST /flush`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
}

/// Tenant name used when a request does not name one.
pub fn default_dbname() -> String {
    "default".to_string()
}
