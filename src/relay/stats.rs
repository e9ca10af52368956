//! Relay statistics shared with the status API.
//!
//! Only the relay task writes; readers take a snapshot under the read lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::cycle::CycleReport;
use crate::config::defaults::{RECENT_FAILURES_CAPACITY, STALE_GRACE_SECS, STALE_INTERVAL_MULTIPLIER};
use crate::config::RelayConfig;
use crate::types::DriverNumber;

pub type SharedStats = Arc<RwLock<RelayStats>>;

/// Liveness derived from the age of the last completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No cycle has completed yet.
    Starting,
    Healthy,
    /// Last cycle is older than the staleness threshold.
    Stale,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Starting => "starting",
            HealthState::Healthy => "healthy",
            HealthState::Stale => "stale",
        }
    }
}

/// One failed fetch, kept for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub at: DateTime<Utc>,
    pub driver: DriverNumber,
    pub resource: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub started_at: DateTime<Utc>,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration_ms: Option<u64>,
    /// Messages published per queue since start.
    pub published: BTreeMap<String, u64>,
    pub records_skipped: u64,
    pub fetch_failures: u64,
    pub broker_reconnects: u64,
    pub last_fetch_error: Option<String>,
    pub recent_failures: VecDeque<FailureEntry>,
    pub roster: Vec<DriverNumber>,
    pub interval_secs: u64,
    pub session: String,
    pub publisher: String,
}

impl RelayStats {
    pub fn new(config: &RelayConfig) -> Self {
        let published = [&config.broker.telemetry_queue, &config.broker.lap_queue]
            .into_iter()
            .map(|q| (q.clone(), 0))
            .collect();
        Self {
            started_at: Utc::now(),
            cycles_completed: 0,
            last_cycle_at: None,
            last_cycle_duration_ms: None,
            published,
            records_skipped: 0,
            fetch_failures: 0,
            broker_reconnects: 0,
            last_fetch_error: None,
            recent_failures: VecDeque::with_capacity(RECENT_FAILURES_CAPACITY),
            roster: config.relay.drivers.clone(),
            interval_secs: config.relay.interval_secs,
            session: config.upstream.session.to_string(),
            publisher: String::new(),
        }
    }

    pub fn shared(self) -> SharedStats {
        Arc::new(RwLock::new(self))
    }

    /// Record the session actually in use after resolution.
    pub fn set_session(&mut self, session: impl Into<String>) {
        self.session = session.into();
    }

    pub fn set_publisher(&mut self, name: impl Into<String>) {
        self.publisher = name.into();
    }

    /// Fold a completed cycle into the counters.
    pub fn record_cycle(&mut self, report: &CycleReport) {
        self.cycles_completed += 1;
        self.last_cycle_at = Some(report.started_at + ChronoDuration::milliseconds(i64::try_from(report.duration_ms).unwrap_or(i64::MAX)));
        self.last_cycle_duration_ms = Some(report.duration_ms);
        self.broker_reconnects += u64::from(report.reconnects);

        for driver in &report.drivers {
            for r in &driver.resources {
                *self.published.entry(r.queue.clone()).or_insert(0) += r.published as u64;
                self.records_skipped += r.skipped as u64;

                if let Some(ref error) = r.fetch_error {
                    self.fetch_failures += 1;
                    self.last_fetch_error = Some(format!("driver {} {}: {}", driver.driver, r.resource, error));
                    if self.recent_failures.len() >= RECENT_FAILURES_CAPACITY {
                        self.recent_failures.pop_front();
                    }
                    self.recent_failures.push_back(FailureEntry {
                        at: report.started_at,
                        driver: driver.driver,
                        resource: r.resource.to_string(),
                        error: error.clone(),
                    });
                }
            }
        }
    }

    /// Oldest acceptable age of the last cycle before the relay counts as stale.
    pub fn stale_after(&self) -> ChronoDuration {
        let secs = self
            .interval_secs
            .saturating_mul(STALE_INTERVAL_MULTIPLIER)
            .saturating_add(STALE_GRACE_SECS);
        ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }

    pub fn health(&self, now: DateTime<Utc>) -> HealthState {
        match self.last_cycle_at {
            None => HealthState::Starting,
            Some(at) if now - at <= self.stale_after() => HealthState::Healthy,
            Some(_) => HealthState::Stale,
        }
    }
}
