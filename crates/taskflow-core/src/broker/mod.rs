//! Event Ingress and Event Publisher: the broker-facing edges of the
//! scheduler. The wire transport itself (AMQP or otherwise) is out of
//! scope; these traits are the contract a real binding implements.

mod memory;

pub use memory::{InMemoryBroker, RecordingPublisher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{GraphId, TaskId};

/// A message as delivered off the wire, before routing-key parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub routing_key: String,
    pub payload: serde_json::Value,
}

/// Inbound completion/failure notifications from the execution queue,
/// decoded from a [`RawMessage`] payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InboundEvent {
    TaskCompleted {
        task_graph_id: GraphId,
        task_id: TaskId,
        /// `false` routes to the rerun-vs-block budget check (spec §4.6)
        /// instead of the success path (spec §4.4).
        success: bool,
        #[serde(default)]
        result_url: Option<String>,
        #[serde(default)]
        logs_url: Option<String>,
    },
    TaskFailed {
        task_graph_id: GraphId,
        task_id: TaskId,
        /// `true` when the execution queue has exhausted its own retry
        /// policy or the failure is otherwise non-retryable: the
        /// progression engine skips the rerun budget entirely and blocks
        /// the graph outright (spec §4.5). `false` is routed the same as a
        /// `TaskCompleted { success: false }` event.
        hard: bool,
        #[serde(default)]
        result_url: Option<String>,
        #[serde(default)]
        logs_url: Option<String>,
    },
}

impl InboundEvent {
    pub fn task_graph_id(&self) -> &GraphId {
        match self {
            InboundEvent::TaskCompleted { task_graph_id, .. } => task_graph_id,
            InboundEvent::TaskFailed { task_graph_id, .. } => task_graph_id,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            InboundEvent::TaskCompleted { task_id, .. } => task_id,
            InboundEvent::TaskFailed { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::TaskCompleted { .. } => "taskCompleted",
            InboundEvent::TaskFailed { .. } => "taskFailed",
        }
    }
}

/// Terminal lifecycle events the progression engine publishes at most once
/// per graph (modulo broker redelivery of the inbound event that caused
/// them).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundEvent {
    TaskGraphBlocked {
        task_graph_id: GraphId,
        /// The task whose non-recoverable failure caused the transition.
        task_id: TaskId,
        routing: String,
    },
    TaskGraphFinished {
        task_graph_id: GraphId,
        routing: String,
    },
}

impl OutboundEvent {
    pub fn task_graph_id(&self) -> &GraphId {
        match self {
            OutboundEvent::TaskGraphBlocked { task_graph_id, .. } => task_graph_id,
            OutboundEvent::TaskGraphFinished { task_graph_id, .. } => task_graph_id,
        }
    }

    pub fn blocking_task_id(&self) -> Option<&TaskId> {
        match self {
            OutboundEvent::TaskGraphBlocked { task_id, .. } => Some(task_id),
            OutboundEvent::TaskGraphFinished { .. } => None,
        }
    }

    pub fn routing(&self) -> &str {
        match self {
            OutboundEvent::TaskGraphBlocked { routing, .. } => routing,
            OutboundEvent::TaskGraphFinished { routing, .. } => routing,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::TaskGraphBlocked { .. } => "taskGraphBlocked",
            OutboundEvent::TaskGraphFinished { .. } => "taskGraphFinished",
        }
    }
}

/// Source of inbound messages. A real binding pulls these off an AMQP
/// consumer; [`InMemoryBroker`] is the in-process stand-in used by tests.
#[async_trait]
pub trait BrokerIngress: Send + Sync {
    async fn next(&self) -> Option<RawMessage>;
}

/// Sink for terminal lifecycle events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: OutboundEvent) -> anyhow::Result<()>;
}

/// Best-effort default publisher: logs the event via `tracing` instead of
/// forwarding it to a real broker. A production deployment supplies its own
/// `EventPublisher` wired to an actual broker binding; this exists so the
/// worker binary has something to run against out of the box.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPublisher;

impl LoggingPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, event: OutboundEvent) -> anyhow::Result<()> {
        tracing::info!(
            kind = event.kind(),
            task_graph_id = %event.task_graph_id(),
            routing = event.routing(),
            "publishing terminal task graph event"
        );
        Ok(())
    }
}

/// Parse a routing key of the form `<schedulerId>.<taskGraphId>.*` into its
/// leading two dotted segments. Routing keys are treated as trusted input
/// from the submission API; a key with fewer than two segments is a
/// protocol violation.
pub fn parse_routing_key(routing_key: &str) -> Result<(String, GraphId), CoreError> {
    let mut parts = routing_key.splitn(3, '.');
    let scheduler_id = parts
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| malformed(routing_key))?;
    let task_graph_id = parts
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| malformed(routing_key))?;

    Ok((scheduler_id.to_string(), GraphId::new(task_graph_id)))
}

fn malformed(routing_key: &str) -> CoreError {
    CoreError::ProtocolViolation(format!("malformed routing key: {routing_key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheduler_and_graph_segments() {
        let (scheduler_id, graph_id) = parse_routing_key("default.g-123.taskCompleted").unwrap();
        assert_eq!(scheduler_id, "default");
        assert_eq!(graph_id, GraphId::new("g-123"));
    }

    #[test]
    fn rejects_single_segment_key() {
        assert!(parse_routing_key("default").is_err());
    }

    #[test]
    fn rejects_empty_key() {
        assert!(parse_routing_key("").is_err());
    }
}
