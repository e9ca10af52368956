//! One relay cycle over the driver roster.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

use super::recovery::{publish_with_recovery, Delivery, ReconnectPolicy};
use super::RelayError;
use crate::broker::Publisher;
use crate::types::{encode, enrich, DriverNumber, QueueNames, Resource};
use crate::upstream::{FetchOutcome, TelemetrySource};

/// Outcome of one resource fetch + publish for one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceReport {
    pub resource: Resource,
    pub queue: String,
    /// Records returned by the upstream.
    pub fetched: usize,
    pub published: usize,
    /// Records dropped because they failed to serialize or were rejected.
    pub skipped: usize,
    /// Set when the fetch failed (as opposed to returning no data).
    pub fetch_error: Option<String>,
}

/// Everything one driver contributed to a cycle, in fetch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    pub driver: DriverNumber,
    pub resources: Vec<ResourceReport>,
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub drivers: Vec<DriverReport>,
    /// Successful broker reconnects during this cycle.
    pub reconnects: u32,
}

impl CycleReport {
    fn resources(&self) -> impl Iterator<Item = &ResourceReport> {
        self.drivers.iter().flat_map(|d| d.resources.iter())
    }

    /// Messages published across both queues.
    pub fn published(&self) -> usize {
        self.resources().map(|r| r.published).sum()
    }

    /// Messages published to one queue.
    pub fn published_to(&self, queue: &str) -> usize {
        self.resources()
            .filter(|r| r.queue == queue)
            .map(|r| r.published)
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.resources().map(|r| r.skipped).sum()
    }

    /// Number of driver/resource fetches that failed.
    pub fn fetch_failures(&self) -> usize {
        self.resources().filter(|r| r.fetch_error.is_some()).count()
    }

    pub fn report_for(&self, driver: DriverNumber, resource: Resource) -> Option<&ResourceReport> {
        self.drivers
            .iter()
            .find(|d| d.driver == driver)?
            .resources
            .iter()
            .find(|r| r.resource == resource)
    }
}

/// Run one sweep over `roster`: fetch, enrich, publish.
///
/// Fetch failures and per-message problems are absorbed into the report;
/// only an unrecoverable broker error is returned as `Err`, in which case
/// the messages published before it stay published.
pub async fn run_cycle<S, P>(
    source: &S,
    publisher: &mut P,
    roster: &[DriverNumber],
    queues: &QueueNames,
    policy: &ReconnectPolicy,
) -> Result<CycleReport, RelayError>
where
    S: TelemetrySource + ?Sized,
    P: Publisher + ?Sized,
{
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut reconnects = 0u32;
    let mut drivers = Vec::with_capacity(roster.len());

    for &driver in roster {
        let mut resources = Vec::with_capacity(Resource::ALL.len());

        for resource in Resource::ALL {
            let queue = queues.for_resource(resource);
            let mut report = ResourceReport {
                resource,
                queue: queue.to_string(),
                fetched: 0,
                published: 0,
                skipped: 0,
                fetch_error: None,
            };

            let records = match source.fetch(driver, resource).await {
                FetchOutcome::Records(records) => records,
                FetchOutcome::Failed(e) => {
                    report.fetch_error = Some(e.to_string());
                    Vec::new()
                }
            };
            report.fetched = records.len();

            for record in records {
                let enriched = enrich(record, driver);
                let body = match encode(&enriched) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(driver, resource = %resource, error = %e, "Failed to serialize record, skipping");
                        report.skipped += 1;
                        continue;
                    }
                };

                match publish_with_recovery(publisher, queue, &body, policy, &mut reconnects).await? {
                    Delivery::Published => {
                        report.published += 1;
                        debug!(driver, queue, bytes = body.len(), "Published record");
                    }
                    Delivery::Rejected => report.skipped += 1,
                }
            }

            resources.push(report);
        }

        drivers.push(DriverReport { driver, resources });
    }

    Ok(CycleReport {
        started_at,
        duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        drivers,
        reconnects,
    })
}
