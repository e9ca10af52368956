//! Publish with connection recovery
//!
//! A dropped broker connection is retried in place: reconnect with
//! exponential backoff, then publish the same message again, so the cycle
//! resumes where it stopped and no message is lost. Only when every attempt
//! fails does the error leave the cycle.

use rand::Rng;
use std::time::Duration;
use tracing::{error, info, warn};

use super::RelayError;
use crate::broker::{PublishError, Publisher};
use crate::config::BrokerConfig;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    /// Broker refused this message; it is dropped.
    Rejected,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up. Zero makes any connection loss fatal.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl ReconnectPolicy {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            jitter: true,
        }
    }

    /// Reconnect without waiting (tests, embedding).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before reconnect `attempt` (1-based): doubles per attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        if self.jitter && !base.is_zero() {
            let max_jitter_ms = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
            let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
            base + Duration::from_millis(jitter_ms)
        } else {
            base
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

/// Publish one message, reconnecting on connection loss.
///
/// `reconnects` is incremented for every successful reconnect.
pub async fn publish_with_recovery<P: Publisher + ?Sized>(
    publisher: &mut P,
    queue: &str,
    body: &[u8],
    policy: &ReconnectPolicy,
    reconnects: &mut u32,
) -> Result<Delivery, RelayError> {
    let mut last_error = match publisher.publish(queue, body).await {
        Ok(()) => return Ok(Delivery::Published),
        Err(PublishError::Rejected { .. }) => {
            warn!(queue, "Broker rejected message, skipping");
            return Ok(Delivery::Rejected);
        }
        Err(e) if e.is_connection_loss() => e,
        Err(e) => return Err(RelayError::Publish(e)),
    };

    warn!(queue, error = %last_error, "Broker connection lost, reconnecting");

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Err(e) = publisher.reconnect().await {
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %e,
                "Reconnect attempt failed"
            );
            if !e.is_connection_loss() {
                return Err(RelayError::Publish(e));
            }
            last_error = e;
            continue;
        }
        *reconnects += 1;
        info!(attempt, "Broker reconnected, retrying publish");

        match publisher.publish(queue, body).await {
            Ok(()) => return Ok(Delivery::Published),
            Err(PublishError::Rejected { .. }) => {
                warn!(queue, "Broker rejected message after reconnect, skipping");
                return Ok(Delivery::Rejected);
            }
            Err(e) if e.is_connection_loss() => last_error = e,
            Err(e) => return Err(RelayError::Publish(e)),
        }
    }

    error!(
        attempts = policy.max_attempts,
        error = %last_error,
        "Broker reconnection exhausted"
    );
    Err(RelayError::BrokerUnavailable {
        attempts: policy.max_attempts,
        last_error: last_error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Fault, MemoryBroker};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(500), "{d:?}");
        }
    }

    #[tokio::test]
    async fn test_reconnect_then_publish_same_message() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);

        let mut reconnects = 0;
        let delivery = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(3), &mut reconnects)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Published);
        assert_eq!(reconnects, 1);
        assert_eq!(broker.messages("q"), vec![b"m1".to_vec()]);
    }

    #[tokio::test]
    async fn test_redeclare_failure_uses_next_attempt() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);
        broker.fail_redeclares(1);

        let mut reconnects = 0;
        let delivery = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(3), &mut reconnects)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Published);
        assert_eq!(reconnects, 1);
        assert_eq!(broker.messages("q"), vec![b"m1".to_vec()]);
    }

    #[tokio::test]
    async fn test_exhausted_reconnects_are_fatal() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);
        broker.fail_reconnects(5);

        let mut reconnects = 0;
        let result = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(3), &mut reconnects).await;
        match result {
            Err(RelayError::BrokerUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected BrokerUnavailable, got {other:?}"),
        }
        assert_eq!(reconnects, 0);
    }

    #[tokio::test]
    async fn test_zero_attempts_fails_immediately() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);

        let mut reconnects = 0;
        let result = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(0), &mut reconnects).await;
        assert!(matches!(result, Err(RelayError::BrokerUnavailable { attempts: 0, .. })));
    }

    #[tokio::test]
    async fn test_rejected_is_not_an_error() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::Reject);

        let mut reconnects = 0;
        let delivery = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(3), &mut reconnects)
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Rejected);
        assert!(broker.messages("q").is_empty());
    }

    #[tokio::test]
    async fn test_closed_publisher_is_fatal_without_retry() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        publisher.close().await.unwrap();

        let mut reconnects = 0;
        let result = publish_with_recovery(&mut publisher, "q", b"m1", &ReconnectPolicy::immediate(3), &mut reconnects).await;
        assert!(matches!(result, Err(RelayError::Publish(PublishError::Closed))));
    }
}
