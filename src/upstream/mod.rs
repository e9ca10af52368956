//! Upstream telemetry fetcher
//!
//! Polls the OpenF1 REST API for one driver and one resource at a time.
//!
//! ## Failure model
//!
//! Fetching is fail-open: a network error, timeout, non-2xx status, or an
//! undecodable body never propagates as an error to the relay loop. Instead
//! the fetcher returns [`FetchOutcome::Failed`] with the reason, which the
//! loop treats exactly like an empty [`FetchOutcome::Records`] while still
//! logging and counting it. There is no retry here; the next cycle is the
//! retry.

pub mod client;
pub mod session;

pub use client::OpenF1Client;
pub use session::{select_session, ActiveSession};

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{DriverNumber, Record, Resource};

/// Upstream fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Upstream returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Upstream reported no sessions")]
    NoSession,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Http(e)
        }
    }
}

/// Result of one fetch, tagged so callers can tell "no data" from "failed".
#[derive(Debug)]
pub enum FetchOutcome {
    /// Upstream answered with these records, in upstream order (possibly none).
    Records(Vec<Record>),
    /// Upstream could not be queried or answered with garbage.
    Failed(FetchError),
}

impl FetchOutcome {
    /// Records to publish; a failure contributes none.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            FetchOutcome::Records(records) => records,
            FetchOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed(_))
    }
}

impl From<Result<Vec<Record>, FetchError>> for FetchOutcome {
    fn from(result: Result<Vec<Record>, FetchError>) -> Self {
        match result {
            Ok(records) => FetchOutcome::Records(records),
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}

/// Trait abstracting where telemetry records come from.
///
/// Implementations must not panic or return errors; all failures are
/// reported through [`FetchOutcome::Failed`].
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch every available record of `resource` for `driver`.
    async fn fetch(&self, driver: DriverNumber, resource: Resource) -> FetchOutcome;

    /// Human-readable name for logging (e.g. "OpenF1").
    fn source_name(&self) -> &str;
}
