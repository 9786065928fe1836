//! Background services.

pub mod maintainer;
pub mod route_monitor;

pub use maintainer::AddrMaintainer;
pub use route_monitor::RouteMonitor;
