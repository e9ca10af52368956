//! Log-only publisher for `--dry-run`: every message goes to the log instead
//! of a broker.

use async_trait::async_trait;
use tracing::info;

use super::{PublishError, Publisher};

#[derive(Debug, Default)]
pub struct LogPublisher {
    published: u64,
    closed: bool,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn declare_queues(&mut self, queues: &[&str]) -> Result<(), PublishError> {
        info!(?queues, "[dry-run] Would declare durable queues");
        Ok(())
    }

    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Closed);
        }
        self.published += 1;
        info!(queue, body = %String::from_utf8_lossy(body), "[dry-run] publish");
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        self.closed = true;
        info!(published = self.published, "[dry-run] publisher closed");
        Ok(())
    }

    fn publisher_name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_closes() {
        let mut p = LogPublisher::new();
        tokio_test::assert_ok!(p.declare_queues(&["telemetry_data"]).await);
        tokio_test::assert_ok!(p.publish("telemetry_data", br#"{"driver_number":44}"#).await);
        assert_eq!(p.published(), 1);
        tokio_test::assert_ok!(p.close().await);
        let err = tokio_test::assert_err!(p.publish("telemetry_data", b"{}").await);
        assert!(matches!(err, PublishError::Closed));
    }
}
