//! Dispatcher: pulls messages off the [`BrokerIngress`], serializes
//! handling per `(taskGraphId, taskId)` pair via an async keyed-mutex map,
//! and bounds overall concurrency with a semaphore — generalizing the
//! results-map-plus-semaphore pattern an orchestrator loop uses to fan work
//! out without a single global lock.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::error;

use crate::broker::{parse_routing_key, BrokerIngress, InboundEvent, RawMessage};
use crate::error::{HandlerError, HandlerOutcome};
use crate::metrics;
use crate::model::TaskKey;
use crate::progression::ProgressionEngine;

/// Map of per-`(taskGraphId, taskId)` async mutexes. Entries accumulate for
/// the lifetime of the process (keyed by every task ever touched) rather
/// than being evicted — acceptable at the scale this scheduler targets,
/// since the map holds one small mutex per task, not per event.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<TaskKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: TaskKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

pub struct Dispatcher {
    ingress: Arc<dyn BrokerIngress>,
    engine: Arc<ProgressionEngine>,
    locks: Arc<KeyedLocks>,
    semaphore: Arc<Semaphore>,
    max_concurrent_handlers: usize,
}

impl Dispatcher {
    pub fn new(
        ingress: Arc<dyn BrokerIngress>,
        engine: Arc<ProgressionEngine>,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            ingress,
            engine,
            locks: Arc::new(KeyedLocks::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent_handlers)),
            max_concurrent_handlers,
        }
    }

    /// Block until every in-flight handler has released its semaphore
    /// permit. Call after the intake loop (`run`) has stopped accepting new
    /// messages, to drain gracefully instead of dropping work on the floor.
    pub async fn drain(&self) {
        let _ = self
            .semaphore
            .acquire_many(self.max_concurrent_handlers as u32)
            .await;
    }

    /// Run until the ingress closes. Each message is dispatched onto its
    /// own task, bounded by `max_concurrent_handlers` and serialized per
    /// key by [`KeyedLocks`].
    pub async fn run(&self) {
        while let Some(message) = self.ingress.next().await {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("dispatcher semaphore closed");
            let engine = self.engine.clone();
            let locks = self.locks.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = dispatch_one(&engine, &locks, message).await;
                if let HandlerOutcome::Fatal(reason) = &outcome {
                    error!(reason = %reason, "event handler hit a protocol violation");
                }
            });
        }
    }

    /// Handle a single message inline, without spawning or bounding
    /// concurrency. Used by tests that want to await a specific message's
    /// outcome directly.
    pub async fn dispatch(&self, message: RawMessage) -> HandlerOutcome {
        dispatch_one(&self.engine, &self.locks, message).await
    }
}

async fn dispatch_one(
    engine: &ProgressionEngine,
    locks: &KeyedLocks,
    message: RawMessage,
) -> HandlerOutcome {
    match dispatch_inner(engine, locks, message).await {
        Ok(outcome) => outcome,
        Err(err) => err.into(),
    }
}

async fn dispatch_inner(
    engine: &ProgressionEngine,
    locks: &KeyedLocks,
    message: RawMessage,
) -> Result<HandlerOutcome, HandlerError> {
    let (_scheduler_id, routing_graph_id) = parse_routing_key(&message.routing_key)
        .map_err(|err| HandlerError::protocol(err.to_string()))?;

    let event: InboundEvent = serde_json::from_value(message.payload)
        .map_err(|err| HandlerError::protocol(format!("malformed event payload: {err}")))?;

    if event.task_graph_id() != &routing_graph_id {
        return Err(HandlerError::protocol(
            "routing key task graph id does not match event payload",
        ));
    }

    let kind = event.kind();
    let key = TaskKey::new(event.task_graph_id().clone(), event.task_id().clone());
    let _guard = locks.acquire(key).await;

    let start = Instant::now();
    let outcome = match event {
        InboundEvent::TaskCompleted {
            task_graph_id,
            task_id,
            success: true,
            result_url,
            logs_url,
        } => {
            engine
                .handle_task_completed(task_graph_id, task_id, result_url, logs_url)
                .await
        }
        // A `task-completed, success=false` event is a soft failure: the
        // core, not the execution queue, owns the rerun budget for it
        // (spec §4.3/§4.6), so it is routed through the same
        // rerun-vs-block path as a non-hard `task-failed` event.
        InboundEvent::TaskCompleted {
            task_graph_id,
            task_id,
            success: false,
            result_url,
            logs_url,
        } => {
            engine
                .handle_task_failed(task_graph_id, task_id, false, result_url, logs_url)
                .await
        }
        InboundEvent::TaskFailed {
            task_graph_id,
            task_id,
            hard,
            result_url,
            logs_url,
        } => {
            engine
                .handle_task_failed(task_graph_id, task_id, hard, result_url, logs_url)
                .await
        }
    };

    metrics::record_handler_duration(kind, start.elapsed().as_secs_f64() * 1000.0);
    outcome
}
