//! Core primitives for the task-graph scheduler.
//!
//! The crate is organised around five collaborators:
//! - [`store`] — the Entity Store Adapter (`TaskStore`, `TaskGraphStore`).
//! - [`broker`] — Event Ingress and Event Publisher traits plus routing-key
//!   parsing.
//! - [`queue`] — the Execution Queue client contract.
//! - [`dispatcher`] — per-`(graph, task)` serialized, concurrency-bounded
//!   dispatch of inbound events.
//! - [`progression`] — the Graph Progression Engine: the actual state
//!   machine deciding rerun-vs-block and detecting graph finish.
//!
//! Ambient concerns (configuration, error taxonomy, telemetry, metrics,
//! audit logging) live alongside these in their own modules.

mod audit;
mod broker;
mod config;
mod dispatcher;
mod error;
mod metrics;
mod model;
mod progression;
mod queue;
mod security;
mod store;
mod telemetry;

pub use audit::{record_terminal_transition, AuditEventKind};
pub use broker::{
    parse_routing_key, BrokerIngress, EventPublisher, InMemoryBroker, InboundEvent,
    LoggingPublisher, OutboundEvent, RawMessage, RecordingPublisher,
};
pub use config::{
    BrokerConfig, ConfigLoader, LoggingConfig, QueueConfig, SchedulerConfig, SchedulerSection,
};
pub use dispatcher::{Dispatcher, KeyedLocks};
pub use error::{CoreError, HandlerError, HandlerOutcome, StoreError};
pub use metrics::{
    init_metrics_from_env, record_dependents_scheduled, record_event_received,
    record_graph_blocked, record_graph_finished, record_handler_duration, record_rerun_requested,
};
pub use model::{GraphId, GraphState, Resolution, Task, TaskGraph, TaskId, TaskKey};
pub use progression::ProgressionEngine;
pub use queue::{ExecutionQueueClient, InMemoryExecutionQueue, QueueCall};
pub use security::{require_env, SecretValue};
pub use store::{GraphMutator, InMemoryEntityStore, TaskGraphStore, TaskMutator, TaskStore};
pub use telemetry::{init_telemetry, TelemetryOptions};
