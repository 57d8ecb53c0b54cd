//! The Graph Progression Engine: the state machine reacting to execution
//! queue completion/failure events, deciding rerun-vs-block, detecting
//! graph finish, and publishing terminal lifecycle events.
//!
//! Every mutator passed to `TaskStore::modify` / `TaskGraphStore::modify`
//! recomputes its "did this transition happen" flag from the entity
//! snapshot it is given — never from a previous invocation — because a
//! losing compare-and-swap attempt causes the store to call the mutator
//! again with a fresher snapshot. All side effects (execution-queue RPCs,
//! event publication, audit logging) happen only after `modify` has
//! returned, and only when the flag says this call actually produced the
//! transition.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::audit::{self, AuditEventKind};
use crate::broker::{EventPublisher, OutboundEvent};
use crate::error::{HandlerError, HandlerOutcome};
use crate::metrics;
use crate::model::{GraphId, GraphState, Resolution, TaskGraph, TaskId, TaskKey};
use crate::queue::ExecutionQueueClient;
use crate::store::{TaskGraphStore, TaskStore};

pub struct ProgressionEngine {
    task_store: Arc<dyn TaskStore>,
    graph_store: Arc<dyn TaskGraphStore>,
    queue: Arc<dyn ExecutionQueueClient>,
    publisher: Arc<dyn EventPublisher>,
    audit_log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureTransition {
    /// The task already carried a resolution; this delivery was a replay.
    AlreadyResolved,
    Rerun,
    /// Either a hard failure (§4.5) or a soft failure with no budget left
    /// (§4.6) — both end in a resolved task and a graph-block attempt.
    Blocked,
}

impl ProgressionEngine {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        graph_store: Arc<dyn TaskGraphStore>,
        queue: Arc<dyn ExecutionQueueClient>,
        publisher: Arc<dyn EventPublisher>,
        audit_log_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            task_store,
            graph_store,
            queue,
            publisher,
            audit_log_dir,
        }
    }

    /// Success path (spec §4.4 / §4.7): mark the task resolved, schedule any
    /// dependents whose full requirement set is now satisfied, and check
    /// whether the graph has finished.
    #[instrument(skip(self), fields(task_graph_id = %task_graph_id, task_id = %task_id))]
    pub async fn handle_task_completed(
        &self,
        task_graph_id: GraphId,
        task_id: TaskId,
        result_url: Option<String>,
        logs_url: Option<String>,
    ) -> Result<HandlerOutcome, HandlerError> {
        metrics::record_event_received("taskCompleted");
        let key = TaskKey::new(task_graph_id.clone(), task_id.clone());
        let resolved_now = AtomicBool::new(false);

        let task = self
            .task_store
            .modify(&key, &|existing| {
                resolved_now.store(false, Ordering::SeqCst);
                let mut task = existing
                    .ok_or_else(|| HandlerError::protocol(format!("unknown task {key}")))?;
                if task.resolution.is_some() {
                    return Ok(task);
                }
                task.resolution = Some(Resolution::success(result_url.clone(), logs_url.clone()));
                resolved_now.store(true, Ordering::SeqCst);
                Ok(task)
            })
            .await?;

        if !resolved_now.load(Ordering::SeqCst) {
            info!("duplicate taskCompleted delivery, ignoring");
            return Ok(HandlerOutcome::Ack);
        }

        self.schedule_ready_dependents(&task).await?;

        if task.is_leaf() {
            self.maybe_finish_graph(&task_graph_id, &task_id).await?;
        }

        Ok(HandlerOutcome::Ack)
    }

    /// Failure path (spec §4.5 / §4.6): a hard failure (the execution
    /// queue exhausted its own retries, or this is a `success=false`
    /// completion with no rerun budget left) skips straight to blocking the
    /// graph; a soft failure with budget remaining requests a rerun
    /// instead. Decided from the current `rerunsLeft` value, independent of
    /// whatever an earlier delivery might have observed.
    #[instrument(skip(self), fields(task_graph_id = %task_graph_id, task_id = %task_id))]
    pub async fn handle_task_failed(
        &self,
        task_graph_id: GraphId,
        task_id: TaskId,
        hard: bool,
        result_url: Option<String>,
        logs_url: Option<String>,
    ) -> Result<HandlerOutcome, HandlerError> {
        metrics::record_event_received("taskFailed");
        let key = TaskKey::new(task_graph_id.clone(), task_id.clone());
        let transition = std::sync::Mutex::new(FailureTransition::AlreadyResolved);

        self.task_store
            .modify(&key, &|existing| {
                *transition.lock().expect("transition flag poisoned") =
                    FailureTransition::AlreadyResolved;
                let mut task = existing
                    .ok_or_else(|| HandlerError::protocol(format!("unknown task {key}")))?;
                if task.resolution.is_some() {
                    return Ok(task);
                }
                if !hard && task.reruns_left > 0 {
                    task.reruns_left -= 1;
                    *transition.lock().expect("transition flag poisoned") =
                        FailureTransition::Rerun;
                } else if hard {
                    task.resolution = Some(Resolution::hard_failure());
                    *transition.lock().expect("transition flag poisoned") =
                        FailureTransition::Blocked;
                } else {
                    task.resolution =
                        Some(Resolution::soft_failure(result_url.clone(), logs_url.clone()));
                    *transition.lock().expect("transition flag poisoned") =
                        FailureTransition::Blocked;
                }
                Ok(task)
            })
            .await?;

        let transition = *transition.lock().expect("transition flag poisoned");
        match transition {
            FailureTransition::AlreadyResolved => {
                info!("duplicate taskFailed delivery, ignoring");
                Ok(HandlerOutcome::Ack)
            }
            FailureTransition::Rerun => {
                metrics::record_rerun_requested();
                self.queue
                    .rerun_task(&task_graph_id, &task_id)
                    .await
                    .map_err(HandlerError::transient)?;
                Ok(HandlerOutcome::Ack)
            }
            FailureTransition::Blocked => {
                warn!("task exhausted its rerun budget or failed hard, blocking graph");
                self.block_graph(&task_graph_id, &task_id).await?;
                Ok(HandlerOutcome::Ack)
            }
        }
    }

    /// For every dependent of a just-completed task, check its *full*
    /// `requires` set against committed `resolution.success` values in the
    /// store — never just the triggering task alone, since a dependent may
    /// require several tasks and this may not be the last one to resolve.
    async fn schedule_ready_dependents(
        &self,
        task: &crate::model::Task,
    ) -> Result<(), HandlerError> {
        let mut ready_count = 0u64;
        for dependent_id in &task.dependents {
            let dependent_key = TaskKey::new(task.task_graph_id.clone(), dependent_id.clone());
            let Some(dependent) = self.task_store.load(&dependent_key).await? else {
                continue;
            };
            if !dependent.is_live() {
                continue;
            }

            let mut all_satisfied = true;
            for required_id in &dependent.requires {
                let required_key =
                    TaskKey::new(task.task_graph_id.clone(), required_id.clone());
                let satisfied = self
                    .task_store
                    .load(&required_key)
                    .await?
                    .map(|t| t.succeeded())
                    .unwrap_or(false);
                if !satisfied {
                    all_satisfied = false;
                    break;
                }
            }

            if all_satisfied {
                self.queue
                    .schedule_task(&task.task_graph_id, dependent_id)
                    .await
                    .map_err(HandlerError::transient)?;
                ready_count += 1;
            }
        }
        metrics::record_dependents_scheduled(ready_count);
        Ok(())
    }

    /// Graph-finish check (spec §4.7): when a leaf task (one nothing else
    /// depends on) succeeds, remove it from the graph's shrinking
    /// `requiresLeft` set; an empty set means the graph is finished.
    async fn maybe_finish_graph(
        &self,
        task_graph_id: &GraphId,
        task_id: &TaskId,
    ) -> Result<(), HandlerError> {
        let finished_now = AtomicBool::new(false);
        let graph = self
            .graph_store
            .modify(task_graph_id, &|existing| {
                finished_now.store(false, Ordering::SeqCst);
                let mut graph: TaskGraph = existing.ok_or_else(|| {
                    HandlerError::protocol(format!("unknown task graph {task_graph_id}"))
                })?;
                if graph.state.is_terminal() {
                    return Ok(graph);
                }
                graph.requires_left.remove(task_id);
                if graph.requires_left.is_empty() {
                    graph.state = GraphState::Finished;
                    finished_now.store(true, Ordering::SeqCst);
                }
                Ok(graph)
            })
            .await?;

        if finished_now.load(Ordering::SeqCst) {
            metrics::record_graph_finished();
            self.publisher
                .publish(OutboundEvent::TaskGraphFinished {
                    task_graph_id: task_graph_id.clone(),
                    routing: graph.routing.clone(),
                })
                .await
                .map_err(HandlerError::transient)?;
            self.write_audit(AuditEventKind::TaskGraphFinished, task_graph_id, &graph.routing);
        }
        Ok(())
    }

    /// Graph-block transition (spec §4.8): idempotent under redelivery —
    /// a graph already `Blocked` or `Finished` is left untouched and no
    /// second `taskGraphBlocked` is published.
    async fn block_graph(
        &self,
        task_graph_id: &GraphId,
        blocking_task_id: &TaskId,
    ) -> Result<(), HandlerError> {
        let blocked_now = AtomicBool::new(false);
        let graph = self
            .graph_store
            .modify(task_graph_id, &|existing| {
                blocked_now.store(false, Ordering::SeqCst);
                let mut graph: TaskGraph = existing.ok_or_else(|| {
                    HandlerError::protocol(format!("unknown task graph {task_graph_id}"))
                })?;
                if graph.state.is_terminal() {
                    return Ok(graph);
                }
                graph.state = GraphState::Blocked;
                blocked_now.store(true, Ordering::SeqCst);
                Ok(graph)
            })
            .await?;

        if blocked_now.load(Ordering::SeqCst) {
            metrics::record_graph_blocked();
            self.publisher
                .publish(OutboundEvent::TaskGraphBlocked {
                    task_graph_id: task_graph_id.clone(),
                    task_id: blocking_task_id.clone(),
                    routing: graph.routing.clone(),
                })
                .await
                .map_err(HandlerError::transient)?;
            self.write_audit(AuditEventKind::TaskGraphBlocked, task_graph_id, &graph.routing);
        }
        Ok(())
    }

    fn write_audit(&self, kind: AuditEventKind, task_graph_id: &GraphId, routing: &str) {
        let Some(dir) = &self.audit_log_dir else {
            return;
        };
        if let Err(err) = audit::record_terminal_transition(dir, kind, task_graph_id, routing) {
            warn!(error = %err, "failed to append audit log entry");
        }
    }
}
