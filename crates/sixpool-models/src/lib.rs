//! Shared data models for the sixpool address pool.
//!
//! This crate is the leaf of the workspace: both the pool server and the
//! lease client depend on it, and it carries no networking or storage
//! dependencies of its own. It provides:
//! - Address status and per-address records (global pool and mirrors)
//! - Status reports sent by lease holders
//! - Pool and mirror statistics
//! - HTTP request/response envelopes for the lease API
//! - Validation helpers for addresses and tenant names

pub mod addr;
pub mod api;
pub mod stats;
pub mod utils;

pub use addr::{AddrReport, AddrStatus, GlobalAddrRecord, MirrorAddrRecord};
pub use api::{
    CheckResponse, ChecksResponse, FlushResponse, PickResponse, PicksResponse, ReportAck,
    ReportRequest, ReportsRequest, SaveResponse, SpawnManyResponse, SpawnResponse,
};
pub use stats::{GlobalStats, MirrorStats};
pub use utils::{is_valid_dbname, parse_addr, AddrParseError};
