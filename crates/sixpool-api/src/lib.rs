//! Axum HTTP server for the IPv6 source-address pool.
//!
//! This crate provides:
//! - The pool orchestrator: spawn/lease protocols over the durable stores
//! - Background services for pool replenishment and prefix monitoring
//! - The lease HTTP API
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pool;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use pool::PoolService;
pub use routes::create_router;
pub use services::{AddrMaintainer, RouteMonitor};
pub use state::AppState;
