//! Core domain types for the telemetry relay.
//!
//! Upstream records are kept opaque: the relay never interprets speed,
//! throttle, or lap-time fields. It only adds the driver number it polled.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Car number identifying a driver for the whole process lifetime.
pub type DriverNumber = u32;

/// One upstream JSON object (telemetry sample or lap record).
///
/// Backed by an insertion-ordered map, so re-encoding preserves the upstream
/// key order with `driver_number` appended last.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Field injected into every published record.
pub const DRIVER_NUMBER_FIELD: &str = "driver_number";

// ============================================================================
// Resource
// ============================================================================

/// Upstream resource polled for each driver, in per-driver fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Instantaneous car state samples (speed, throttle, RPM, ...).
    CarData,
    /// Completed-lap summaries.
    Laps,
}

impl Resource {
    /// Resources fetched per driver, in the order they are published.
    pub const ALL: [Resource; 2] = [Resource::CarData, Resource::Laps];

    /// Path segment appended to the upstream base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::CarData => "car_data",
            Resource::Laps => "laps",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

// ============================================================================
// Queue Names
// ============================================================================

/// Destination queues, one per resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    pub telemetry: String,
    pub laps: String,
}

impl QueueNames {
    pub fn new(telemetry: impl Into<String>, laps: impl Into<String>) -> Self {
        Self {
            telemetry: telemetry.into(),
            laps: laps.into(),
        }
    }

    /// Queue that records of `resource` are published to.
    pub fn for_resource(&self, resource: Resource) -> &str {
        match resource {
            Resource::CarData => &self.telemetry,
            Resource::Laps => &self.laps,
        }
    }

    /// Both queue names, telemetry first.
    pub fn all(&self) -> [&str; 2] {
        [&self.telemetry, &self.laps]
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self::new(
            crate::config::defaults::TELEMETRY_QUEUE,
            crate::config::defaults::LAP_QUEUE,
        )
    }
}

impl From<&crate::config::BrokerConfig> for QueueNames {
    fn from(cfg: &crate::config::BrokerConfig) -> Self {
        Self::new(cfg.telemetry_queue.clone(), cfg.lap_queue.clone())
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Tag an upstream record with the driver that produced it.
///
/// The relay owns this field: an upstream `driver_number` is overwritten
/// with the roster driver that was polled.
pub fn enrich(mut record: Record, driver: DriverNumber) -> Record {
    record.insert(DRIVER_NUMBER_FIELD.to_string(), serde_json::Value::from(driver));
    record
}

/// Encode an enriched record as a UTF-8 JSON message body.
pub fn encode(record: &Record) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

/// Decode a message body back into the record and its driver number.
///
/// Returns `None` when the body is not a JSON object carrying an integer
/// `driver_number`.
pub fn decode(body: &[u8]) -> Option<(Record, DriverNumber)> {
    let record: Record = serde_json::from_slice(body).ok()?;
    let driver = record
        .get(DRIVER_NUMBER_FIELD)?
        .as_u64()
        .and_then(|n| DriverNumber::try_from(n).ok())?;
    Some((record, driver))
}
