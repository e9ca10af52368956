//! OpenF1 Client - HTTP client for the upstream telemetry API
//!
//! Issues `GET {base}/{resource}?session_key=..&driver_number=..` and decodes
//! the JSON array of objects the API returns.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{FetchError, FetchOutcome, TelemetrySource};
use crate::config::defaults::LATEST_SESSION;
use crate::config::UpstreamConfig;
use crate::types::{DriverNumber, Record, Resource};

/// HTTP client for the OpenF1 API
#[derive(Clone)]
pub struct OpenF1Client {
    http: reqwest::Client,
    base_url: String,
    /// Concrete session key, or `None` to ask for "latest" on every call
    session_key: Option<u64>,
}

impl OpenF1Client {
    /// Create a client with the given base URL and per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_key: None,
        })
    }

    /// Create a client from the `[upstream]` config section.
    ///
    /// The session selector is applied separately by
    /// [`select_session`](super::select_session) because pinning needs a
    /// network round-trip.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, FetchError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Use a fixed session key instead of "latest".
    pub fn pin_session(&mut self, session_key: u64) {
        self.session_key = Some(session_key);
    }

    /// Value sent as the `session_key` query parameter.
    pub fn session_param(&self) -> String {
        self.session_key
            .map_or_else(|| LATEST_SESSION.to_string(), |k| k.to_string())
    }

    /// Get base URL for logging
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base}/{path}` with query parameters and decode a JSON array.
    pub(crate) async fn get_array<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, FetchError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn fetch_records(
        &self,
        driver: DriverNumber,
        resource: Resource,
    ) -> Result<Vec<Record>, FetchError> {
        self.get_array(
            resource.path(),
            &[
                ("session_key", self.session_param()),
                ("driver_number", driver.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl TelemetrySource for OpenF1Client {
    async fn fetch(&self, driver: DriverNumber, resource: Resource) -> FetchOutcome {
        let result = self.fetch_records(driver, resource).await;
        match &result {
            Ok(records) => {
                debug!(driver, resource = %resource, records = records.len(), "Fetched upstream records");
            }
            Err(e) => {
                warn!(driver, resource = %resource, error = %e, "Upstream fetch failed, treating as no data");
            }
        }
        result.into()
    }

    fn source_name(&self) -> &str {
        "OpenF1"
    }
}
