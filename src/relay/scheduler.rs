//! Relay scheduler: paces cycles and owns the publisher for its lifetime.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::cycle::{run_cycle, CycleReport};
use super::recovery::ReconnectPolicy;
use super::stats::SharedStats;
use super::RelayError;
use crate::broker::Publisher;
use crate::config::RelayConfig;
use crate::types::{DriverNumber, QueueNames};
use crate::upstream::TelemetrySource;

/// Result of waiting out one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Interval elapsed, start the next cycle.
    Ready,
    /// Shutdown requested during the sleep.
    Cancelled,
}

/// Fixed-interval sleeper that wakes early on cancellation.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    cancel: CancellationToken,
}

impl Pacer {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait(&self) -> Tick {
        if self.cancel.is_cancelled() {
            return Tick::Cancelled;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Tick::Cancelled,
            _ = tokio::time::sleep(self.interval) => Tick::Ready,
        }
    }
}

/// Totals returned when the relay stops cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub published: u64,
}

/// The relay: a telemetry source, a publisher, and the pacing between cycles.
pub struct Relay<S, P> {
    source: S,
    publisher: P,
    roster: Vec<DriverNumber>,
    queues: QueueNames,
    policy: ReconnectPolicy,
    pacer: Pacer,
    stats: SharedStats,
    summary: RunSummary,
}

impl<S, P> Relay<S, P>
where
    S: TelemetrySource,
    P: Publisher,
{
    pub fn new(
        config: &RelayConfig,
        source: S,
        publisher: P,
        stats: SharedStats,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            publisher,
            roster: config.relay.drivers.clone(),
            queues: QueueNames::from(&config.broker),
            policy: ReconnectPolicy::from_config(&config.broker),
            pacer: Pacer::new(config.interval(), cancel),
            stats,
            summary: RunSummary::default(),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Declare both queues. Safe to call against queues that already exist.
    pub async fn start(&mut self) -> Result<(), RelayError> {
        self.publisher
            .declare_queues(&self.queues.all())
            .await
            .map_err(RelayError::Declare)?;
        self.stats
            .write()
            .await
            .set_publisher(self.publisher.publisher_name());
        info!(
            telemetry = %self.queues.telemetry,
            laps = %self.queues.laps,
            publisher = self.publisher.publisher_name(),
            "Queues declared"
        );
        Ok(())
    }

    /// Run one cycle and fold it into the shared stats.
    pub async fn cycle(&mut self) -> Result<CycleReport, RelayError> {
        let report = run_cycle(
            &self.source,
            &mut self.publisher,
            &self.roster,
            &self.queues,
            &self.policy,
        )
        .await?;

        self.stats.write().await.record_cycle(&report);
        self.summary.cycles += 1;
        self.summary.published += report.published() as u64;

        let fetch_failures = report.fetch_failures();
        if fetch_failures > 0 {
            warn!(
                cycle = self.summary.cycles,
                fetch_failures,
                "Cycle completed with upstream failures"
            );
        }
        info!(
            cycle = self.summary.cycles,
            telemetry = report.published_to(&self.queues.telemetry),
            laps = report.published_to(&self.queues.laps),
            skipped = report.skipped(),
            reconnects = report.reconnects,
            duration_ms = report.duration_ms,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Declare queues, run exactly one cycle, close the publisher.
    pub async fn run_once(mut self) -> Result<CycleReport, RelayError> {
        self.start_or_shutdown().await?;
        let result = self.cycle().await;
        self.shutdown().await;
        result
    }

    /// Cycle until cancelled. A cycle in progress always finishes; only the
    /// sleep between cycles is interrupted.
    pub async fn run(mut self) -> Result<RunSummary, RelayError> {
        self.start_or_shutdown().await?;
        info!(
            drivers = ?self.roster,
            interval_secs = self.pacer.interval().as_secs(),
            source = self.source.source_name(),
            "Relay loop started"
        );

        loop {
            if let Err(e) = self.cycle().await {
                error!(error = %e, "Relay stopped on unrecoverable error");
                self.shutdown().await;
                return Err(e);
            }
            match self.pacer.wait().await {
                Tick::Ready => {}
                Tick::Cancelled => break,
            }
        }

        info!(
            cycles = self.summary.cycles,
            published = self.summary.published,
            "Relay received shutdown signal"
        );
        self.shutdown().await;
        Ok(self.summary)
    }

    async fn start_or_shutdown(&mut self) -> Result<(), RelayError> {
        if let Err(e) = self.start().await {
            error!(error = %e, "Relay failed to start");
            self.shutdown().await;
            return Err(e);
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        match self.publisher.close().await {
            Ok(()) => info!("Broker connection closed"),
            Err(e) => warn!(error = %e, "Failed to close broker connection cleanly"),
        }
    }
}
