//! Relay Configuration - roster, cadence, upstream and broker settings
//!
//! Every tunable of the relay is a field in this module. Each struct
//! implements `Default` with the values in [`super::defaults`], so a missing
//! config file means "poll 44, 1, 16 every 5s against OpenF1 and a local
//! RabbitMQ".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

use super::defaults;
use crate::types::DriverNumber;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "F1_RELAY_CONFIG";

/// Config file looked up in the working directory when no path is given.
pub const LOCAL_CONFIG_FILE: &str = "relay_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a relay process.
///
/// Load with [`RelayConfig::load`] which searches:
/// 1. explicit path (`--config` / `$F1_RELAY_CONFIG`)
/// 2. `./relay_config.toml`
/// 3. Built-in defaults
///
/// then apply [`ConfigOverrides`] from the environment / CLI on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upstream telemetry API
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Roster and cadence
    #[serde(default)]
    pub relay: LoopConfig,

    /// Message broker
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Optional status endpoint
    #[serde(default)]
    pub status: StatusConfig,
}

impl RelayConfig {
    /// Load configuration using the standard search order.
    ///
    /// An explicitly requested file that cannot be read or parsed is an
    /// error; the implicit `./relay_config.toml` is only used when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. Explicit path (CLI flag or env var, clap merges both)
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded relay config");
            return Ok(config);
        }

        // 2. Check ./relay_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded relay config from ./{}", LOCAL_CONFIG_FILE);
            return Ok(config);
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys are reported as warnings; they never fail the load.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse a TOML document, warning about unknown keys.
    ///
    /// Does not validate: overrides are usually applied afterwards.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))
    }

    /// Apply environment / CLI overrides on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(drivers) = &overrides.drivers {
            self.relay.drivers.clone_from(drivers);
        }
        if let Some(secs) = overrides.interval_secs {
            self.relay.interval_secs = secs;
        }
        if let Some(url) = &overrides.api_base {
            self.upstream.base_url.clone_from(url);
        }
        if let Some(session) = &overrides.session {
            self.upstream.session = session.clone();
        }
        if let Some(url) = &overrides.amqp_url {
            self.broker.url.clone_from(url);
        }
        if let Some(addr) = &overrides.status_addr {
            self.status.addr = Some(addr.clone());
        }
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration for internal consistency.
    ///
    /// Collects every problem rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Roster: non-empty, positive, unique
        let drivers = &self.relay.drivers;
        if drivers.is_empty() {
            errors.push("relay.drivers must contain at least one driver number".to_string());
        }
        if drivers.contains(&0) {
            errors.push("relay.drivers: driver number 0 is not valid".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for d in drivers {
            if !seen.insert(d) {
                errors.push(format!("relay.drivers: driver {d} is listed more than once"));
            }
        }

        // Cadence
        let interval = self.relay.interval_secs;
        if interval == 0 || interval > defaults::MAX_RELAY_INTERVAL_SECS {
            errors.push(format!(
                "relay.interval_secs = {interval} must be within 1..={}",
                defaults::MAX_RELAY_INTERVAL_SECS
            ));
        }

        // Upstream
        if self.upstream.request_timeout_secs == 0 {
            errors.push("upstream.request_timeout_secs must be > 0".to_string());
        }
        match reqwest::Url::parse(&self.upstream.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "upstream.base_url scheme '{}' is not http(s)",
                url.scheme()
            )),
            Err(e) => errors.push(format!(
                "upstream.base_url '{}' is not a valid URL: {e}",
                self.upstream.base_url
            )),
        }

        // Broker
        let b = &self.broker;
        if !(b.url.starts_with("amqp://") || b.url.starts_with("amqps://")) {
            errors.push("broker.url must start with amqp:// or amqps://".to_string());
        }
        if b.telemetry_queue.trim().is_empty() {
            errors.push("broker.telemetry_queue must not be empty".to_string());
        }
        if b.lap_queue.trim().is_empty() {
            errors.push("broker.lap_queue must not be empty".to_string());
        }
        if b.telemetry_queue == b.lap_queue {
            errors.push(format!(
                "broker.telemetry_queue and broker.lap_queue must differ (both '{}')",
                b.lap_queue
            ));
        }
        if b.reconnect_initial_delay_ms > b.reconnect_max_delay_ms {
            errors.push(format!(
                "broker.reconnect_initial_delay_ms ({}) must be <= reconnect_max_delay_ms ({})",
                b.reconnect_initial_delay_ms, b.reconnect_max_delay_ms
            ));
        }

        // Status
        if let Some(addr) = &self.status.addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!("status.addr '{addr}' is not a valid HOST:PORT socket address"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Cycle sleep as a `Duration`.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.relay.interval_secs)
    }
}

// ============================================================================
// Overrides
// ============================================================================

/// Values supplied by environment variables or CLI flags.
///
/// `None` leaves the file / default value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub drivers: Option<Vec<DriverNumber>>,
    pub interval_secs: Option<u64>,
    pub api_base: Option<String>,
    pub session: Option<SessionSelector>,
    pub amqp_url: Option<String>,
    pub status_addr: Option<String>,
}

// ============================================================================
// Upstream Config
// ============================================================================

/// Upstream telemetry API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// API base URL including the version path.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Which session to poll.
    #[serde(default)]
    pub session: SessionSelector,
}

fn default_base_url() -> String { defaults::UPSTREAM_BASE_URL.to_string() }
fn default_request_timeout_secs() -> u64 { defaults::UPSTREAM_REQUEST_TIMEOUT_SECS }

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            session: SessionSelector::default(),
        }
    }
}

/// Session selection strategy.
///
/// Serialized as `"latest"`, `"pinned"`, or a bare session key number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionSelector {
    /// Send `session_key=latest` on every request.
    #[default]
    Latest,
    /// Resolve "latest" once at startup and keep using that key.
    Pinned,
    /// Always use this session key.
    Key(u64),
}

impl fmt::Display for SessionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSelector::Latest => write!(f, "latest"),
            SessionSelector::Pinned => write!(f, "pinned"),
            SessionSelector::Key(k) => write!(f, "{k}"),
        }
    }
}

impl FromStr for SessionSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "pinned" => Ok(Self::Pinned),
            other => other
                .parse::<u64>()
                .map(Self::Key)
                .map_err(|_| format!("invalid session '{s}': expected 'latest', 'pinned' or a session key")),
        }
    }
}

impl Serialize for SessionSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SessionSelector::Key(k) => serializer.serialize_u64(*k),
            other => serializer.collect_str(other),
        }
    }
}

impl<'de> Deserialize<'de> for SessionSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Key(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Key(k) => Ok(SessionSelector::Key(k)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// Loop Config
// ============================================================================

/// Roster and cycle cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Driver numbers polled each cycle, in publish order.
    #[serde(default = "default_drivers")]
    pub drivers: Vec<DriverNumber>,

    /// Sleep between cycles (seconds).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_drivers() -> Vec<DriverNumber> { defaults::DEFAULT_DRIVERS.to_vec() }
fn default_interval_secs() -> u64 { defaults::RELAY_INTERVAL_SECS }

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            drivers: default_drivers(),
            interval_secs: default_interval_secs(),
        }
    }
}

// ============================================================================
// Broker Config
// ============================================================================

/// AMQP broker and publish-recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// AMQP connection URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Queue for car telemetry samples.
    #[serde(default = "default_telemetry_queue")]
    pub telemetry_queue: String,

    /// Queue for lap records.
    #[serde(default = "default_lap_queue")]
    pub lap_queue: String,

    /// Wait for broker acks on every publish; nacked messages are skipped.
    #[serde(default = "default_publisher_confirms")]
    pub publisher_confirms: bool,

    /// Reconnect attempts after a connection loss before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// First reconnect delay (milliseconds).
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,

    /// Reconnect delay cap (milliseconds).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_broker_url() -> String { defaults::BROKER_URL.to_string() }
fn default_telemetry_queue() -> String { defaults::TELEMETRY_QUEUE.to_string() }
fn default_lap_queue() -> String { defaults::LAP_QUEUE.to_string() }
fn default_publisher_confirms() -> bool { true }
fn default_reconnect_attempts() -> u32 { defaults::BROKER_RECONNECT_ATTEMPTS }
fn default_reconnect_initial_delay_ms() -> u64 { defaults::BROKER_RECONNECT_INITIAL_DELAY_MS }
fn default_reconnect_max_delay_ms() -> u64 { defaults::BROKER_RECONNECT_MAX_DELAY_MS }

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            telemetry_queue: default_telemetry_queue(),
            lap_queue: default_lap_queue(),
            publisher_confirms: default_publisher_confirms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

// ============================================================================
// Status Config
// ============================================================================

/// Status endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Bind address (`HOST:PORT`). Absent disables the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Failed to read {}: {}", path.display(), e),
            ConfigError::Parse(path, e) if path.as_os_str().is_empty() => {
                write!(f, "Failed to parse relay config: {}", e)
            }
            ConfigError::Parse(path, e) => write!(f, "Failed to parse {}: {}", path.display(), e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: RelayConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.relay.drivers, vec![44, 1, 16]);
        assert_eq!(config.relay.interval_secs, 5);
        assert_eq!(config.broker.telemetry_queue, "telemetry_data");
        assert_eq!(config.broker.lap_queue, "lap_data");
        assert_eq!(config.upstream.session, SessionSelector::Latest);
        assert!(config.status.addr.is_none());
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[relay]
drivers = [4, 81]

[broker]
lap_queue = "laps_v2"
"#;
        let config: RelayConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.relay.drivers, vec![4, 81]);
        assert_eq!(config.broker.lap_queue, "laps_v2");
        // Non-overridden values retain defaults
        assert_eq!(config.relay.interval_secs, 5);
        assert_eq!(config.broker.telemetry_queue, "telemetry_data");
        assert_eq!(config.upstream.request_timeout_secs, 10);
    }

    #[test]
    fn test_session_selector_forms() {
        let cases = [
            ("session = \"latest\"", SessionSelector::Latest),
            ("session = \"pinned\"", SessionSelector::Pinned),
            ("session = 9158", SessionSelector::Key(9158)),
            ("session = \"9158\"", SessionSelector::Key(9158)),
        ];
        for (line, expected) in cases {
            let toml_str = format!("[upstream]\n{line}\n");
            let config: RelayConfig = toml::from_str(&toml_str).expect("session should parse");
            assert_eq!(config.upstream.session, expected, "for {line}");
        }

        let bad: Result<RelayConfig, _> = toml::from_str("[upstream]\nsession = \"yesterday\"\n");
        assert!(bad.is_err());
    }

    #[test]
    fn test_validation_catches_empty_roster() {
        let mut config = RelayConfig::default();
        config.relay.drivers.clear();
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("relay.drivers")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_catches_duplicate_driver() {
        let mut config = RelayConfig::default();
        config.relay.drivers = vec![44, 1, 44];
        let result = config.validate();
        assert!(result.is_err(), "Duplicate driver should fail validation");
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("driver 44")));
        }
    }

    #[test]
    fn test_validation_catches_zero_interval() {
        let mut config = RelayConfig::default();
        config.relay.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_same_queue_names() {
        let mut config = RelayConfig::default();
        config.broker.lap_queue = config.broker.telemetry_queue.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_bad_urls() {
        let mut config = RelayConfig::default();
        config.upstream.base_url = "ftp://example.com".to_string();
        config.broker.url = "http://localhost:5672".to_string();
        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.contains("upstream.base_url")));
                assert!(errors.iter().any(|e| e.contains("broker.url")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_catches_inverted_backoff() {
        let mut config = RelayConfig::default();
        config.broker.reconnect_initial_delay_ms = 60_000;
        config.broker.reconnect_max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config: RelayConfig =
            toml::from_str("[relay]\ndrivers = [4]\ninterval_secs = 30\n").unwrap();
        config.apply_overrides(&ConfigOverrides {
            drivers: Some(vec![63, 12]),
            interval_secs: Some(2),
            status_addr: Some("127.0.0.1:9090".to_string()),
            ..Default::default()
        });
        assert_eq!(config.relay.drivers, vec![63, 12]);
        assert_eq!(config.relay.interval_secs, 2);
        assert_eq!(config.status.addr.as_deref(), Some("127.0.0.1:9090"));
        // Untouched
        assert_eq!(config.broker.url, defaults::BROKER_URL);
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut original = RelayConfig::default();
        original.upstream.session = SessionSelector::Key(9158);
        let toml_str = original.to_toml().expect("serialization should work");
        let roundtripped: RelayConfig =
            toml::from_str(&toml_str).expect("deserialization should work");
        assert_eq!(roundtripped.relay.drivers, original.relay.drivers);
        assert_eq!(roundtripped.upstream.session, SessionSelector::Key(9158));
        assert!(toml_str.contains("[broker]"), "Missing [broker] section");
        assert!(toml_str.contains("[upstream]"), "Missing [upstream] section");
    }
}
