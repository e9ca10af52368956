//! In-memory broker
//!
//! Keeps declared queues as FIFO lists inside the process. The
//! [`MemoryBroker`] handle is shared: tests hold one to inspect queues and
//! inject faults while the relay owns the [`MemoryPublisher`].

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{PublishError, Publisher};

/// A failure injected into the next publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The connection drops; publishes fail until a reconnect succeeds.
    ConnectionLost,
    /// The broker nacks this one message.
    Reject,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Vec<Vec<u8>>>,
    /// Declaration order, for stable listing
    order: Vec<String>,
    connected: bool,
    /// Whether the most recent publisher has been closed
    closed: bool,
    faults: VecDeque<Fault>,
    failing_reconnects: u32,
    failing_redeclares: u32,
    failing_declares: u32,
    reconnects: u32,
    declare_calls: u32,
}

/// Shared handle onto the in-memory queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// A connected publisher writing into this broker.
    pub fn publisher(&self) -> MemoryPublisher {
        let mut state = self.lock();
        state.connected = true;
        state.closed = false;
        MemoryPublisher {
            broker: self.clone(),
            declared: Vec::new(),
            closed: false,
        }
    }

    /// Bodies currently held by `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock().queues.get(queue).cloned().unwrap_or_default()
    }

    /// Decode every body in `queue` as JSON.
    pub fn json_messages(&self, queue: &str) -> Vec<serde_json::Value> {
        self.messages(queue)
            .iter()
            .filter_map(|b| serde_json::from_slice(b).ok())
            .collect()
    }

    /// Names of all declared queues, in declaration order.
    pub fn queue_names(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Queue the given fault for the next publish.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Make the next `n` reconnect attempts fail.
    pub fn fail_reconnects(&self, n: u32) {
        self.lock().failing_reconnects = n;
    }

    /// Make the next `n` reconnects drop the connection again while
    /// redeclaring queues.
    pub fn fail_redeclares(&self, n: u32) {
        self.lock().failing_redeclares = n;
    }

    /// Make the next `n` `declare_queues` calls fail.
    pub fn fail_declares(&self, n: u32) {
        self.lock().failing_declares = n;
    }

    /// Successful reconnects so far.
    pub fn reconnects(&self) -> u32 {
        self.lock().reconnects
    }

    /// Total `declare_queues` calls, including redeclarations.
    pub fn declare_calls(&self) -> u32 {
        self.lock().declare_calls
    }

    /// Whether the most recently created publisher has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Publisher half of [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryPublisher {
    broker: MemoryBroker,
    declared: Vec<String>,
    closed: bool,
}

impl MemoryPublisher {
    fn declare_in(state: &mut BrokerState, queue: &str) {
        if !state.queues.contains_key(queue) {
            state.queues.insert(queue.to_string(), Vec::new());
            state.order.push(queue.to_string());
        }
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn declare_queues(&mut self, queues: &[&str]) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Closed);
        }
        let mut state = self.broker.lock();
        state.declare_calls += 1;
        if state.failing_declares > 0 {
            state.failing_declares -= 1;
            return Err(PublishError::Declare {
                queue: queues.first().map_or_else(String::new, |q| (*q).to_string()),
                reason: "PRECONDITION_FAILED - inequivalent arg 'durable'".to_string(),
            });
        }
        for queue in queues {
            Self::declare_in(&mut state, queue);
            if !self.declared.iter().any(|q| q == queue) {
                self.declared.push((*queue).to_string());
            }
        }
        Ok(())
    }

    async fn publish(&mut self, queue: &str, body: &[u8]) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Closed);
        }
        let mut state = self.broker.lock();
        match state.faults.pop_front() {
            Some(Fault::ConnectionLost) => state.connected = false,
            Some(Fault::Reject) => {
                return Err(PublishError::Rejected {
                    queue: queue.to_string(),
                })
            }
            None => {}
        }
        if !state.connected {
            return Err(PublishError::Connection("connection reset by broker".to_string()));
        }

        // Default exchange drops messages for undeclared queues.
        if let Some(messages) = state.queues.get_mut(queue) {
            messages.push(body.to_vec());
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::Closed);
        }
        let mut state = self.broker.lock();
        if state.failing_reconnects > 0 {
            state.failing_reconnects -= 1;
            return Err(PublishError::Connection("connection refused".to_string()));
        }
        if state.failing_redeclares > 0 {
            state.failing_redeclares -= 1;
            state.connected = false;
            return Err(PublishError::Connection(
                "channel closed while redeclaring queues".to_string(),
            ));
        }
        state.connected = true;
        state.reconnects += 1;
        for queue in &self.declared {
            Self::declare_in(&mut state, queue);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        self.closed = true;
        let mut state = self.broker.lock();
        state.connected = false;
        state.closed = true;
        Ok(())
    }

    fn publisher_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redeclare_keeps_contents() {
        let broker = MemoryBroker::new();
        let mut first = broker.publisher();
        first.declare_queues(&["telemetry_data", "lap_data"]).await.unwrap();
        first.publish("telemetry_data", b"{\"speed\":300}").await.unwrap();

        // Second process start against the same broker
        let mut second = broker.publisher();
        second.declare_queues(&["telemetry_data", "lap_data"]).await.unwrap();

        assert_eq!(broker.messages("telemetry_data"), vec![b"{\"speed\":300}".to_vec()]);
        assert_eq!(broker.queue_names(), vec!["telemetry_data", "lap_data"]);
        assert_eq!(broker.declare_calls(), 2);
    }

    #[tokio::test]
    async fn test_connection_lost_until_reconnect() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);

        let err = publisher.publish("q", b"1").await.unwrap_err();
        assert!(err.is_connection_loss());
        assert!(publisher.publish("q", b"2").await.unwrap_err().is_connection_loss());

        publisher.reconnect().await.unwrap();
        publisher.publish("q", b"3").await.unwrap();
        assert_eq!(broker.messages("q"), vec![b"3".to_vec()]);
        assert_eq!(broker.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_reject_affects_single_message() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::Reject);

        assert!(matches!(
            publisher.publish("q", b"1").await,
            Err(PublishError::Rejected { .. })
        ));
        publisher.publish("q", b"2").await.unwrap();
        assert_eq!(broker.messages("q"), vec![b"2".to_vec()]);
    }

    #[tokio::test]
    async fn test_closed_publisher_refuses_work() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        publisher.close().await.unwrap();
        assert!(broker.is_closed());
        assert!(matches!(publisher.publish("q", b"1").await, Err(PublishError::Closed)));
    }

    #[tokio::test]
    async fn test_closing_one_publisher_leaves_broker_usable() {
        let broker = MemoryBroker::new();
        let mut first = broker.publisher();
        first.declare_queues(&["q"]).await.unwrap();
        first.publish("q", b"1").await.unwrap();
        first.close().await.unwrap();
        assert!(broker.is_closed());

        let mut second = broker.publisher();
        assert!(!broker.is_closed());
        second.declare_queues(&["q"]).await.unwrap();
        second.publish("q", b"2").await.unwrap();
        assert_eq!(broker.messages("q"), vec![b"1".to_vec(), b"2".to_vec()]);

        // The closed publisher stays closed
        assert!(matches!(first.publish("q", b"3").await, Err(PublishError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_redeclare_is_connection_loss() {
        let broker = MemoryBroker::new();
        let mut publisher = broker.publisher();
        publisher.declare_queues(&["q"]).await.unwrap();
        broker.inject(Fault::ConnectionLost);
        broker.fail_redeclares(1);

        assert!(publisher.publish("q", b"1").await.unwrap_err().is_connection_loss());
        assert!(publisher.reconnect().await.unwrap_err().is_connection_loss());
        publisher.reconnect().await.unwrap();
        publisher.publish("q", b"2").await.unwrap();
        assert_eq!(broker.reconnects(), 1);
    }
}
