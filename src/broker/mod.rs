//! Message broker publishing
//!
//! The relay writes enriched JSON records onto two durable queues through the
//! default exchange (routing key = queue name). Everything broker-specific is
//! behind the [`Publisher`] trait:
//!
//! - **AmqpPublisher**: RabbitMQ / AMQP 0-9-1 via `lapin`
//! - **MemoryPublisher**: in-process queues for tests and embedding
//! - **LogPublisher**: `--dry-run`, logs every message instead of sending it
//!
//! ## Error classes
//!
//! [`PublishError::Connection`] means the connection or channel is gone and
//! a [`Publisher::reconnect`] may fix it. [`PublishError::Rejected`] concerns
//! a single message only. Declaration failures are fatal at startup.

pub mod amqp;
pub mod log;
pub mod memory;

pub use amqp::AmqpPublisher;
pub use log::LogPublisher;
pub use memory::{Fault, MemoryBroker, MemoryPublisher};

use async_trait::async_trait;
use thiserror::Error;

/// Content type set on every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Broker publish errors
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Broker rejected message on queue '{queue}'")]
    Rejected { queue: String },

    #[error("Failed to declare queue '{queue}': {reason}")]
    Declare { queue: String, reason: String },

    #[error("Publisher is closed")]
    Closed,
}

impl PublishError {
    /// Whether reconnecting could make the same publish succeed.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, PublishError::Connection(_))
    }
}

/// Trait abstracting the queue the relay publishes to.
///
/// Implementations remember the queues passed to
/// [`declare_queues`](Publisher::declare_queues) and redeclare them on
/// [`reconnect`](Publisher::reconnect).
#[async_trait]
pub trait Publisher: Send {
    /// Declare durable queues. Must be idempotent: redeclaring an existing
    /// queue with the same settings leaves its contents untouched.
    async fn declare_queues(&mut self, queues: &[&str]) -> Result<(), PublishError>;

    /// Publish one message body to `queue` via the default exchange.
    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError>;

    /// Drop the current connection, open a new one and redeclare queues.
    async fn reconnect(&mut self) -> Result<(), PublishError>;

    /// Release the connection. Further publishes return [`PublishError::Closed`].
    async fn close(&mut self) -> Result<(), PublishError>;

    /// Human-readable name for logging (e.g. "AMQP", "memory").
    fn publisher_name(&self) -> &str;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Box<P> {
    async fn declare_queues(&mut self, queues: &[&str]) -> Result<(), PublishError> {
        (**self).declare_queues(queues).await
    }

    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError> {
        (**self).publish(queue, body).await
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        (**self).reconnect().await
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        (**self).close().await
    }

    fn publisher_name(&self) -> &str {
        (**self).publisher_name()
    }
}
