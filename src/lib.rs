//! F1 Telemetry Relay: live timing bridge from OpenF1 to AMQP queues
//!
//! Polls the OpenF1 REST API for a fixed roster of drivers, tags every
//! record with the driver it was fetched for, and publishes it to durable
//! broker queues for downstream consumers.
//!
//! ## Architecture
//!
//! - **Upstream**: fail-open HTTP fetcher for `car_data` and `laps`
//! - **Broker**: publisher abstraction with AMQP, in-memory and dry-run backends
//! - **Relay**: fetch/enrich/publish cycles, paced and cancellable
//! - **API**: optional status endpoint for health checks and counters

pub mod api;
pub mod broker;
pub mod config;
pub mod relay;
pub mod types;
pub mod upstream;

pub use config::RelayConfig;

pub use types::{DriverNumber, QueueNames, Record, Resource};

pub use broker::{AmqpPublisher, LogPublisher, MemoryBroker, PublishError, Publisher};

pub use relay::{run_cycle, CycleReport, Relay, RelayError, RelayStats};

pub use upstream::{FetchError, FetchOutcome, OpenF1Client, TelemetrySource};
