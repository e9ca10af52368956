//! Session selection
//!
//! OpenF1 accepts `session_key=latest`, which follows whatever session is
//! newest at request time. When the latest session changes mid-run (race
//! ends, next session starts) a long-running relay would silently switch
//! streams. Pinned mode resolves "latest" once at startup and keeps that key.

use serde::Deserialize;
use std::fmt;
use tracing::{info, warn};

use super::{FetchError, OpenF1Client};
use crate::config::SessionSelector;

/// Subset of an OpenF1 session object needed to pin it.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_key: u64,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub circuit_short_name: Option<String>,
}

/// Session the relay ended up polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSession {
    /// Every request asks for "latest".
    Latest,
    /// Every request uses this key.
    Pinned(u64),
}

impl fmt::Display for ActiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveSession::Latest => write!(f, "latest"),
            ActiveSession::Pinned(k) => write!(f, "{k}"),
        }
    }
}

impl OpenF1Client {
    /// Resolve the current "latest" session via `GET /sessions?session_key=latest`.
    pub async fn resolve_latest_session(&self) -> Result<SessionInfo, FetchError> {
        let sessions: Vec<SessionInfo> = self
            .get_array("sessions", &[("session_key", "latest".to_string())])
            .await?;
        sessions.into_iter().next().ok_or(FetchError::NoSession)
    }
}

/// Apply a session selector to the client.
///
/// Pinning that fails to resolve falls back to "latest" with a warning
/// rather than refusing to start.
pub async fn select_session(client: &mut OpenF1Client, selector: SessionSelector) -> ActiveSession {
    match selector {
        SessionSelector::Latest => ActiveSession::Latest,
        SessionSelector::Key(key) => {
            client.pin_session(key);
            info!(session_key = key, "Using configured session");
            ActiveSession::Pinned(key)
        }
        SessionSelector::Pinned => match client.resolve_latest_session().await {
            Ok(session) => {
                client.pin_session(session.session_key);
                info!(
                    session_key = session.session_key,
                    session = session.session_name.as_deref().unwrap_or("unknown"),
                    circuit = session.circuit_short_name.as_deref().unwrap_or("unknown"),
                    "Pinned latest session"
                );
                ActiveSession::Pinned(session.session_key)
            }
            Err(e) => {
                warn!(error = %e, "Could not resolve latest session, falling back to session_key=latest");
                ActiveSession::Latest
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_info_ignores_extra_fields() {
        let body = r#"[{"session_key": 9158, "session_name": "Race", "circuit_short_name": "Monza", "year": 2023, "gmt_offset": "02:00:00"}]"#;
        let sessions: Vec<SessionInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(sessions[0].session_key, 9158);
        assert_eq!(sessions[0].session_name.as_deref(), Some("Race"));
    }

    #[tokio::test]
    async fn test_explicit_key_pins_without_network() {
        let mut client = OpenF1Client::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let active = select_session(&mut client, SessionSelector::Key(7763)).await;
        assert_eq!(active, ActiveSession::Pinned(7763));
        assert_eq!(client.session_param(), "7763");
    }

    #[tokio::test]
    async fn test_pinned_falls_back_to_latest_when_unreachable() {
        let mut client = OpenF1Client::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let active = select_session(&mut client, SessionSelector::Pinned).await;
        assert_eq!(active, ActiveSession::Latest);
        assert_eq!(client.session_param(), "latest");
    }
}
