//! Global prefix discovery and candidate address generation.
//!
//! The host is expected to own a routable /64. We find it by walking the
//! interfaces: the first interface (in enumeration order) that is not
//! excluded and whose first IPv6 address is global unicast wins, and the
//! prefix is cut from that address using the interface netmask.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use tracing::debug;

use crate::error::{NetError, NetResult};

/// Interface-name prefixes skipped during probing. Tunnel interfaces
/// carry addresses that are not usable as outbound sources here.
pub const DEFAULT_EXCLUDED_INTERFACES: &[&str] = &["cloudflare"];

/// Result of a successful prefix probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixInfo {
    /// Interface that carries the prefix.
    pub interface: String,
    /// Colon-joined leading groups, without a trailing `::/N`.
    /// Example: `2001:db8:1:2`.
    pub prefix: String,
    /// Mask length derived from the netmask, in bits.
    pub prefix_bits: u8,
}

/// Probe the host for its current global IPv6 prefix.
///
/// `exclude` entries are matched case-insensitively against the start of
/// interface names. Fails with [`NetError::NoGlobalIpv6`] when no
/// interface qualifies.
pub fn probe_prefix(exclude: &[String]) -> NetResult<PrefixInfo> {
    let ifaddrs =
        nix::ifaddrs::getifaddrs().map_err(|e| NetError::Ifaddrs(e.to_string()))?;

    // Collect (addr, netmask) pairs per interface, preserving first-seen
    // interface order.
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, Vec<(Ipv6Addr, Option<Ipv6Addr>)>> = HashMap::new();

    for ifaddr in ifaddrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let Some(sockaddr) = address.as_sockaddr_in6() else {
            continue;
        };
        let netmask = ifaddr
            .netmask
            .as_ref()
            .and_then(|m| m.as_sockaddr_in6())
            .map(|m| m.ip());

        let name = ifaddr.interface_name;
        if !entries.contains_key(&name) {
            order.push(name.clone());
        }
        entries
            .entry(name)
            .or_default()
            .push((sockaddr.ip(), netmask));
    }

    for name in order {
        let lower = name.to_lowercase();
        if exclude.iter().any(|p| lower.starts_with(&p.to_lowercase())) {
            debug!(interface = %name, "skipping excluded interface");
            continue;
        }

        let Some(addrs) = entries.get(&name) else {
            continue;
        };
        // The interface qualifies on its first global unicast address;
        // link-local and ULA entries are passed over.
        let Some(&(addr, netmask)) = addrs.iter().find(|(a, _)| is_global_unicast(a)) else {
            continue;
        };

        // A missing netmask is treated as the expected /64.
        let mask = netmask.unwrap_or(Ipv6Addr::new(
            0xffff, 0xffff, 0xffff, 0xffff, 0, 0, 0, 0,
        ));
        let (prefix, prefix_bits) = derive_prefix(&addr, &mask);
        if prefix.is_empty() {
            continue;
        }

        return Ok(PrefixInfo {
            interface: name,
            prefix,
            prefix_bits,
        });
    }

    Err(NetError::NoGlobalIpv6)
}

/// Global unicast heuristic: the first hex digit of the address is `2`.
fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] >> 12 == 0x2
}

/// Cut a textual prefix out of `addr` using `mask`.
///
/// The mask length is the number of leading `f` nibbles times four,
/// rounded down to whole 16-bit groups when selecting address groups.
fn derive_prefix(addr: &Ipv6Addr, mask: &Ipv6Addr) -> (String, u8) {
    let mut nibbles: u32 = 0;
    'count: for segment in mask.segments() {
        for shift in [12u32, 8, 4, 0] {
            if (segment >> shift) & 0xf == 0xf {
                nibbles += 1;
            } else {
                break 'count;
            }
        }
    }

    let prefix_bits = nibbles * 4;
    let num_groups = (prefix_bits / 16) as usize;
    let prefix = addr.segments()[..num_groups]
        .iter()
        .map(|s| format!("{s:x}"))
        .collect::<Vec<_>>()
        .join(":");

    (prefix, prefix_bits as u8)
}

/// Generate a random address under `prefix`.
///
/// The suffix is four random 16-bit groups in lowercase hex with leading
/// zeros stripped; an all-zero group renders as `0`.
pub fn random_addr(prefix: &str) -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let mut addr = String::with_capacity(prefix.len() + 20);
    addr.push_str(prefix);
    for _ in 0..4 {
        let group: u16 = rng.random();
        addr.push(':');
        addr.push_str(&format!("{group:x}"));
    }
    addr
}
