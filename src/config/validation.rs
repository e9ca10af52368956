//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `RelayConfig`.
///
/// Maintained by hand to match the struct hierarchy in relay_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [upstream]
        "upstream",
        "upstream.base_url",
        "upstream.request_timeout_secs",
        "upstream.session",
        // [relay]
        "relay",
        "relay.drivers",
        "relay.interval_secs",
        // [broker]
        "broker",
        "broker.url",
        "broker.telemetry_queue",
        "broker.lap_queue",
        "broker.publisher_confirms",
        "broker.reconnect_attempts",
        "broker.reconnect_initial_delay_ms",
        "broker.reconnect_max_delay_ms",
        // [status]
        "status",
        "status.addr",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
