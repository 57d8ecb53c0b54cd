//! Execution Queue client: the collaborator that actually runs tasks.
//! Out of scope per this crate's charter beyond its trait contract — the
//! core only ever needs to ask it to (re)schedule work, idempotently.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::model::{GraphId, TaskId};

/// RPCs the progression engine issues against the execution queue. Both
/// must be safe to call more than once for the same `(graph, task)` pair —
/// the engine calls them without first confirming whether a prior attempt
/// already landed.
#[async_trait]
pub trait ExecutionQueueClient: Send + Sync {
    async fn schedule_task(&self, graph_id: &GraphId, task_id: &TaskId) -> anyhow::Result<()>;

    async fn rerun_task(&self, graph_id: &GraphId, task_id: &TaskId) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCall {
    Schedule(GraphId, TaskId),
    Rerun(GraphId, TaskId),
}

/// Recording in-memory execution queue for tests and local/dev runs. Never
/// actually runs anything; it just remembers what it was asked to do.
#[derive(Default)]
pub struct InMemoryExecutionQueue {
    calls: Mutex<Vec<QueueCall>>,
}

impl InMemoryExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<QueueCall> {
        self.calls.lock().expect("queue call log poisoned").clone()
    }
}

#[async_trait]
impl ExecutionQueueClient for InMemoryExecutionQueue {
    async fn schedule_task(&self, graph_id: &GraphId, task_id: &TaskId) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("queue call log poisoned")
            .push(QueueCall::Schedule(graph_id.clone(), task_id.clone()));
        Ok(())
    }

    async fn rerun_task(&self, graph_id: &GraphId, task_id: &TaskId) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("queue call log poisoned")
            .push(QueueCall::Rerun(graph_id.clone(), task_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let queue = InMemoryExecutionQueue::new();
        let g = GraphId::new("g1");
        queue.schedule_task(&g, &TaskId::new("t1")).await.unwrap();
        queue.rerun_task(&g, &TaskId::new("t2")).await.unwrap();

        assert_eq!(
            queue.calls(),
            vec![
                QueueCall::Schedule(GraphId::new("g1"), TaskId::new("t1")),
                QueueCall::Rerun(GraphId::new("g1"), TaskId::new("t2")),
            ]
        );
    }
}
