//! External reachability checks.
//!
//! A candidate address is usable when an HTTP request *sourced from it*
//! reaches a public echo service and the echoed caller address matches the
//! candidate. Binding the candidate as the transport's local address also
//! pins the connection to the v6 family: a dual-stack host cannot silently
//! fall back to IPv4 with a v6 source bound.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Default echo service; responds with the caller's address in the body.
pub const DEFAULT_CHECK_URL: &str = "https://test.ipw.cn";

/// Default per-probe timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict-only reachability probe.
///
/// Implementations must be infallible in the signature sense: any
/// transport or protocol failure is a `false`, never an error or a panic.
#[async_trait]
pub trait AddrChecker: Send + Sync {
    /// True iff `addr` can source a request to the echo service and the
    /// echoed address equals `addr`.
    async fn check(&self, addr: &str) -> bool;
}

/// Production checker: GET against an echo URL with the candidate bound
/// as the local address.
pub struct HttpChecker {
    echo_url: String,
    timeout: Duration,
}

impl HttpChecker {
    pub fn new(echo_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            echo_url: echo_url.into(),
            timeout,
        }
    }
}

impl Default for HttpChecker {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_URL, DEFAULT_CHECK_TIMEOUT)
    }
}

#[async_trait]
impl AddrChecker for HttpChecker {
    async fn check(&self, addr: &str) -> bool {
        let candidate: Ipv6Addr = match addr.trim().parse() {
            Ok(ip) => ip,
            Err(_) => {
                debug!(addr, "check rejected: not an IPv6 literal");
                return false;
            }
        };

        // One client per probe: the bound local address differs every
        // time, and dropping the client closes its sockets on all paths.
        let client = match reqwest::Client::builder()
            .local_address(IpAddr::V6(candidate))
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                debug!(addr, error = %e, "check failed: client build");
                return false;
            }
        };

        let response = match client.get(&self.echo_url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(addr, error = %e, "check failed: request");
                return false;
            }
        };

        if !response.status().is_success() {
            debug!(addr, status = %response.status(), "check failed: HTTP status");
            return false;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(addr, error = %e, "check failed: body read");
                return false;
            }
        };

        // Compare as parsed addresses so the echo service's textual form
        // (compressed vs expanded) cannot cause a false negative.
        match body.trim().parse::<Ipv6Addr>() {
            Ok(echoed) if echoed == candidate => true,
            Ok(echoed) => {
                debug!(addr, echoed = %echoed, "check failed: echoed a different source");
                false
            }
            Err(_) => {
                debug!(addr, "check failed: echo body is not an address");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn echo_server(body: &str) -> MockServer {
        // Listen on v6 loopback so a checker bound to ::1 can reach it.
        let listener = std::net::TcpListener::bind("[::1]:0").expect("bind ::1");
        let server = MockServer::builder().listener(listener).start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_check_accepts_matching_echo() {
        let server = echo_server("::1").await;
        let checker = HttpChecker::new(server.uri(), Duration::from_secs(5));
        assert!(checker.check("::1").await);
    }

    #[tokio::test]
    async fn test_check_accepts_whitespace_and_expanded_form() {
        let server = echo_server("\n  0:0:0:0:0:0:0:1  \n").await;
        let checker = HttpChecker::new(server.uri(), Duration::from_secs(5));
        assert!(checker.check("::1").await);
    }

    #[tokio::test]
    async fn test_check_rejects_mismatched_echo() {
        let server = echo_server("2001:db8::2").await;
        let checker = HttpChecker::new(server.uri(), Duration::from_secs(5));
        assert!(!checker.check("::1").await);
    }

    #[tokio::test]
    async fn test_check_rejects_non_address_body() {
        let server = echo_server("<html>blocked</html>").await;
        let checker = HttpChecker::new(server.uri(), Duration::from_secs(5));
        assert!(!checker.check("::1").await);
    }

    #[tokio::test]
    async fn test_check_rejects_error_status() {
        let listener = std::net::TcpListener::bind("[::1]:0").unwrap();
        let server = MockServer::builder().listener(listener).start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let checker = HttpChecker::new(server.uri(), Duration::from_secs(5));
        assert!(!checker.check("::1").await);
    }

    #[tokio::test]
    async fn test_check_rejects_invalid_literal_without_network() {
        let checker = HttpChecker::new("http://[::1]:1", Duration::from_secs(5));
        assert!(!checker.check("not-an-address").await);
        assert!(!checker.check("").await);
    }

    #[tokio::test]
    async fn test_check_swallows_connect_failure() {
        // Nothing listens here; must be false, not an error.
        let checker = HttpChecker::new("http://[::1]:9", Duration::from_secs(1));
        assert!(!checker.check("::1").await);
    }
}
