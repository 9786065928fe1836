//! Validation helpers shared by the server and client.

use std::net::Ipv6Addr;

use thiserror::Error;

/// Error for rejected address literals.
#[derive(Debug, Error)]
#[error("invalid IPv6 literal: {0}")]
pub struct AddrParseError(pub String);

/// Parse an IPv6 literal, rejecting anything `std::net` does not accept.
pub fn parse_addr(s: &str) -> Result<Ipv6Addr, AddrParseError> {
    s.trim()
        .parse::<Ipv6Addr>()
        .map_err(|_| AddrParseError(s.to_string()))
}

/// Whether a tenant name is safe to use as a file stem.
///
/// Mirror state is persisted as `ipv6_mirrors/<dbname>.json`, so names are
/// restricted to `[A-Za-z0-9._-]`, non-empty, and may not start with a dot.
pub fn is_valid_dbname(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
