//! Pool server HTTP client.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use sixpool_models::{
    AddrReport, AddrStatus, FlushResponse, GlobalStats, MirrorStats, PickResponse, PicksResponse,
    ReportAck, ReportRequest, ReportsRequest,
};

use crate::error::{ClientError, ClientResult};

/// Configuration for the pool client.
#[derive(Debug, Clone)]
pub struct PoolClientConfig {
    /// Base URL of the pool server
    pub base_url: String,
    /// Tenant name whose mirror this client leases from
    pub dbname: String,
    /// Request timeout
    pub timeout: Duration,
    /// How long [`PoolClient::pick_wait`] sleeps between empty picks
    pub retry_interval: Duration,
}

impl Default for PoolClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8966".to_string(),
            dbname: "default".to_string(),
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(3),
        }
    }
}

impl PoolClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("SIXPOOL_URL").unwrap_or(defaults.base_url),
            dbname: std::env::var("SIXPOOL_DBNAME").unwrap_or(defaults.dbname),
            timeout: std::env::var("SIXPOOL_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry_interval: std::env::var("SIXPOOL_RETRY_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
        }
    }
}

/// Client for the sixpool lease API.
pub struct PoolClient {
    http: Client,
    config: PoolClientConfig,
}

impl PoolClient {
    /// Create a new pool client.
    pub fn new(config: PoolClientConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Network)?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(PoolClientConfig::from_env())
    }

    pub fn dbname(&self) -> &str {
        &self.config.dbname
    }

    /// Lease one idle address. `Ok(None)` means the mirror has nothing
    /// idle right now; callers should back off and retry.
    pub async fn pick(&self) -> ClientResult<Option<String>> {
        let url = format!(
            "{}/pick?dbname={}",
            self.config.base_url, self.config.dbname
        );
        let response: PickResponse = self.get_json(&url).await?;
        Ok(response.addr.filter(|_| response.success))
    }

    /// Lease an address, waiting until one is granted.
    ///
    /// An empty mirror is a capacity state, not an error: the server may
    /// be mid-spawn or mid-prefix-change. Sleep and ask again.
    pub async fn pick_wait(&self) -> ClientResult<String> {
        loop {
            if let Some(addr) = self.pick().await? {
                debug!(dbname = %self.config.dbname, addr = %addr, "leased address");
                return Ok(addr);
            }
            warn!(
                dbname = %self.config.dbname,
                retry_in = ?self.config.retry_interval,
                "no idle address available, retrying"
            );
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// Lease up to `num` idle addresses.
    pub async fn picks(&self, num: usize) -> ClientResult<Vec<String>> {
        let url = format!(
            "{}/picks?dbname={}&num={}",
            self.config.base_url, self.config.dbname, num
        );
        let response: PicksResponse = self.get_json(&url).await?;
        Ok(response.addrs)
    }

    /// Report one address's status back to the server.
    pub async fn report(&self, addr: impl Into<String>, status: AddrStatus) -> ClientResult<()> {
        let body = ReportRequest {
            dbname: self.config.dbname.clone(),
            report_info: AddrReport::new(addr, status),
        };
        let url = format!("{}/report", self.config.base_url);
        let _ack: ReportAck = self.post_json(&url, &body).await?;
        Ok(())
    }

    /// Report several addresses at once.
    pub async fn reports(&self, reports: Vec<AddrReport>) -> ClientResult<()> {
        let body = ReportsRequest {
            dbname: self.config.dbname.clone(),
            report_infos: reports,
        };
        let url = format!("{}/reports", self.config.base_url);
        let _ack: ReportAck = self.post_json(&url, &body).await?;
        Ok(())
    }

    /// This tenant's mirror statistics.
    pub async fn stats(&self) -> ClientResult<MirrorStats> {
        let url = format!(
            "{}/stats?dbname={}",
            self.config.base_url, self.config.dbname
        );
        self.get_json(&url).await
    }

    /// Global pool statistics.
    pub async fn global_stats(&self) -> ClientResult<GlobalStats> {
        let url = format!("{}/stats", self.config.base_url);
        self.get_json(&url).await
    }

    /// Flush this tenant's mirror; its records come back idle.
    pub async fn flush(&self) -> ClientResult<()> {
        let url = format!(
            "{}/flush?dbname={}",
            self.config.base_url, self.config.dbname
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(ClientError::Network)?;
        let _body: FlushResponse = Self::decode(response).await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ClientResult<T> {
        let response = self.http.get(url).send().await.map_err(ClientError::Network)?;
        Self::decode(response).await
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> ClientResult<T> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(ClientError::Network)?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClientError::api(format!("{status}: {detail}")));
        }
        response.json().await.map_err(ClientError::Network)
    }
}
