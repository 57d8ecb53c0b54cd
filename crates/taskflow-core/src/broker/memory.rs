use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BrokerIngress, EventPublisher, OutboundEvent, RawMessage};

/// Channel-backed in-memory ingress, standing in for a real AMQP consumer
/// binding in tests and local/dev runs.
pub struct InMemoryBroker {
    sender: mpsc::UnboundedSender<RawMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<RawMessage>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Deliver a message to the ingress, as if it had arrived off the wire.
    pub fn deliver(&self, message: RawMessage) {
        // Only fails if the receiver half was dropped, which never happens
        // while `self` is alive.
        let _ = self.sender.send(message);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerIngress for InMemoryBroker {
    async fn next(&self) -> Option<RawMessage> {
        let mut receiver = self.receiver.lock().expect("ingress receiver poisoned");
        receiver.recv().await
    }
}

/// Recording publisher for tests: remembers every event it was asked to
/// publish instead of forwarding it to a real broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<OutboundEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<OutboundEvent> {
        self.published
            .lock()
            .expect("published event log poisoned")
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: OutboundEvent) -> anyhow::Result<()> {
        self.published
            .lock()
            .expect("published event log poisoned")
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GraphId;

    #[tokio::test]
    async fn delivers_messages_in_order() {
        let broker = InMemoryBroker::new();
        broker.deliver(RawMessage {
            routing_key: "default.g1.taskCompleted".to_string(),
            payload: serde_json::json!({}),
        });

        let message = broker.next().await.expect("message should be delivered");
        assert_eq!(message.routing_key, "default.g1.taskCompleted");
    }

    #[tokio::test]
    async fn publisher_records_events() {
        let publisher = RecordingPublisher::new();
        publisher
            .publish(OutboundEvent::TaskGraphFinished {
                task_graph_id: GraphId::new("g1"),
                routing: "default.g1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(publisher.published().len(), 1);
    }
}
