//! Relay Loop - fetch, enrich, publish, sleep
//!
//! ## Architecture
//!
//! - **run_cycle**: one sweep over the roster. For each driver, in roster
//!   order, fetch car data then laps, tag every record with the driver
//!   number, and publish it to the matching queue. Pure with respect to
//!   time: no sleeping, so tests can drive single cycles deterministically.
//! - **recovery**: wraps each publish; connection loss triggers reconnect
//!   with exponential backoff, a rejected message is skipped.
//! - **Relay / Pacer**: the scheduler. Runs cycles back to back with a fixed
//!   sleep in between until the cancellation token fires. A cycle that has
//!   started always finishes.
//! - **stats**: counters shared with the status API.
//!
//! ## Failure semantics
//!
//! | Failure                    | Effect                                   |
//! |----------------------------|------------------------------------------|
//! | fetch error / non-2xx      | zero records for that driver + resource  |
//! | record fails to serialize  | record skipped, cycle continues          |
//! | broker nacks a message     | message skipped, cycle continues         |
//! | connection lost            | reconnect + retry, fatal when exhausted  |

pub mod cycle;
pub mod recovery;
pub mod scheduler;
pub mod stats;

pub use cycle::{run_cycle, CycleReport, DriverReport, ResourceReport};
pub use recovery::{publish_with_recovery, Delivery, ReconnectPolicy};
pub use scheduler::{Pacer, Relay, RunSummary, Tick};
pub use stats::{HealthState, RelayStats, SharedStats};

use thiserror::Error;

use crate::broker::PublishError;

/// Errors that stop the relay
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to declare queues: {0}")]
    Declare(#[source] PublishError),

    #[error("Broker unavailable after {attempts} reconnect attempts: {last_error}")]
    BrokerUnavailable { attempts: u32, last_error: String },

    #[error("Publish failed: {0}")]
    Publish(#[source] PublishError),
}
