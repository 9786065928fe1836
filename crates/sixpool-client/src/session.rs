//! Leased, source-bound HTTP clients.
//!
//! A lease is only useful if requests actually originate from the leased
//! address. [`bound_client`] builds a `reqwest` client with the address
//! pinned as the transport's local address, which also forces the v6
//! family on dual-stack hosts. [`LeasedClient`] packages the lease and
//! the bound client together.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use sixpool_models::{parse_addr, AddrStatus};

use crate::client::PoolClient;
use crate::error::{ClientError, ClientResult};

/// Build an HTTP client whose connections are sourced from `addr`.
pub fn bound_client(addr: &str, timeout: Duration) -> ClientResult<Client> {
    let ip = parse_addr(addr).map_err(|e| ClientError::InvalidAddr(e.to_string()))?;
    Client::builder()
        .local_address(IpAddr::V6(ip))
        .timeout(timeout)
        .build()
        .map_err(ClientError::Network)
}

/// A leased address paired with an HTTP client bound to it.
pub struct LeasedClient {
    addr: String,
    http: Client,
}

impl LeasedClient {
    /// Lease an address from the pool (waiting for one if the mirror is
    /// empty) and build a client bound to it.
    pub async fn acquire(pool: &PoolClient, timeout: Duration) -> ClientResult<Self> {
        let addr = pool.pick_wait().await?;
        let http = bound_client(&addr, timeout)?;
        debug!(addr = %addr, "bound leased address");
        Ok(Self { addr, http })
    }

    /// The leased address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The bound HTTP client.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Report the lease back to the pool with `status` and consume the
    /// client. `Idle` returns the address to rotation; `Unusable` parks
    /// it.
    pub async fn release(self, pool: &PoolClient, status: AddrStatus) -> ClientResult<()> {
        pool.report(self.addr, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_client_rejects_invalid_literal() {
        let err = bound_client("not-an-addr", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddr(_)));
    }

    #[test]
    fn test_bound_client_builds_for_loopback() {
        bound_client("::1", Duration::from_secs(5)).unwrap();
    }
}
