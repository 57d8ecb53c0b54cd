//! End-to-end scenarios for the graph progression engine, exercised against
//! the in-memory store, execution queue and event publisher.

use std::collections::HashSet;
use std::sync::Arc;

use taskflow_core::{
    BrokerIngress, Dispatcher, GraphId, GraphState, InMemoryBroker, InMemoryEntityStore,
    InMemoryExecutionQueue, InboundEvent, OutboundEvent, ProgressionEngine, QueueCall,
    RawMessage, RecordingPublisher, Task, TaskGraph, TaskGraphStore, TaskId, TaskStore,
};

struct Harness {
    store: Arc<InMemoryEntityStore>,
    queue: Arc<InMemoryExecutionQueue>,
    publisher: Arc<RecordingPublisher>,
    engine: ProgressionEngine,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryEntityStore::new());
        let queue = Arc::new(InMemoryExecutionQueue::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = ProgressionEngine::new(
            store.clone() as Arc<dyn TaskStore>,
            store.clone() as Arc<dyn TaskGraphStore>,
            queue.clone() as Arc<dyn taskflow_core::ExecutionQueueClient>,
            publisher.clone() as Arc<dyn taskflow_core::EventPublisher>,
            None,
        );
        Self {
            store,
            queue,
            publisher,
            engine,
        }
    }

    async fn graph(&self, id: &GraphId) -> TaskGraph {
        TaskGraphStore::load(self.store.as_ref(), id)
            .await
            .expect("graph load should not error")
            .expect("graph should exist")
    }

    async fn task(&self, graph_id: &GraphId, task_id: &TaskId) -> Task {
        TaskStore::load(
            self.store.as_ref(),
            &taskflow_core::TaskKey::new(graph_id.clone(), task_id.clone()),
        )
        .await
        .expect("task load should not error")
        .expect("task should exist")
    }
}

fn seed_linear_chain(store: &InMemoryEntityStore, graph_id: &GraphId, reruns: u32) -> String {
    let routing = format!("default.{graph_id}");

    let mut a = Task::new(graph_id.clone(), TaskId::new("a"), 0);
    a.dependents.insert(TaskId::new("b"));

    let mut b = Task::new(graph_id.clone(), TaskId::new("b"), reruns);
    b.requires.insert(TaskId::new("a"));
    b.dependents.insert(TaskId::new("c"));

    let mut c = Task::new(graph_id.clone(), TaskId::new("c"), reruns);
    c.requires.insert(TaskId::new("b"));

    store.put_task(a);
    store.put_task(b);
    store.put_task(c);

    let mut leaves = HashSet::new();
    leaves.insert(TaskId::new("c"));
    store.put_graph(TaskGraph::new(graph_id.clone(), routing.clone(), leaves));
    routing
}

/// Two independent leaves, `left` and `right`, both required for the graph
/// to finish; neither depends on the other.
fn seed_diamond(store: &InMemoryEntityStore, graph_id: &GraphId) -> String {
    let routing = format!("default.{graph_id}");

    let left = Task::new(graph_id.clone(), TaskId::new("left"), 0);
    let right = Task::new(graph_id.clone(), TaskId::new("right"), 0);
    store.put_task(left);
    store.put_task(right);

    let mut leaves = HashSet::new();
    leaves.insert(TaskId::new("left"));
    leaves.insert(TaskId::new("right"));
    store.put_graph(TaskGraph::new(graph_id.clone(), routing.clone(), leaves));
    routing
}

#[tokio::test]
async fn linear_chain_finishes() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-linear");
    let routing = seed_linear_chain(&h.store, &graph_id, 0);

    for task_id in ["a", "b", "c"] {
        h.engine
            .handle_task_completed(graph_id.clone(), TaskId::new(task_id), None, None)
            .await
            .expect("handler should succeed");
    }

    let graph = h.graph(&graph_id).await;
    assert_eq!(graph.state, GraphState::Finished);

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    match &published[0] {
        OutboundEvent::TaskGraphFinished { routing: event_routing, .. } => {
            assert_eq!(event_routing, &routing);
        }
        other => panic!("expected TaskGraphFinished, got {other:?}"),
    }

    assert_eq!(
        h.queue.calls(),
        vec![
            QueueCall::Schedule(graph_id.clone(), TaskId::new("b")),
            QueueCall::Schedule(graph_id.clone(), TaskId::new("c")),
        ]
    );
}

#[tokio::test]
async fn rerun_budget_consumed_then_blocks() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-rerun");
    let routing = seed_linear_chain(&h.store, &graph_id, 1);

    h.engine
        .handle_task_completed(graph_id.clone(), TaskId::new("a"), None, None)
        .await
        .unwrap();

    // b has 1 rerun left: first soft failure should trigger a rerun, not a block.
    h.engine
        .handle_task_failed(graph_id.clone(), TaskId::new("b"), false, None, None)
        .await
        .unwrap();
    assert_eq!(
        h.queue.calls(),
        vec![
            QueueCall::Schedule(graph_id.clone(), TaskId::new("b")),
            QueueCall::Rerun(graph_id.clone(), TaskId::new("b")),
        ]
    );
    assert!(h.publisher.published().is_empty());

    // Budget exhausted: the next soft failure blocks the graph.
    h.engine
        .handle_task_failed(graph_id.clone(), TaskId::new("b"), false, None, None)
        .await
        .unwrap();

    let graph = h.graph(&graph_id).await;
    assert_eq!(graph.state, GraphState::Blocked);
    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    match &published[0] {
        OutboundEvent::TaskGraphBlocked { task_id, routing: event_routing, .. } => {
            assert_eq!(task_id, &TaskId::new("b"));
            assert_eq!(event_routing, &routing);
        }
        other => panic!("expected TaskGraphBlocked, got {other:?}"),
    }

    // A budget-exhausted soft failure is still a *completed* task (spec
    // §4.6 step 1), unlike a hard failure — never `hard_failure()`.
    let b = h.task(&graph_id, &TaskId::new("b")).await;
    let resolution = b.resolution.expect("b should be resolved");
    assert!(resolution.completed);
    assert!(!resolution.success);
}

#[tokio::test]
async fn hard_failure_bypasses_rerun() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-hard");
    let routing = seed_linear_chain(&h.store, &graph_id, 5);

    h.engine
        .handle_task_completed(graph_id.clone(), TaskId::new("a"), None, None)
        .await
        .unwrap();

    h.engine
        .handle_task_failed(graph_id.clone(), TaskId::new("b"), true, None, None)
        .await
        .unwrap();

    // No rerun call was made despite the task still having budget left.
    assert!(!h
        .queue
        .calls()
        .iter()
        .any(|call| matches!(call, QueueCall::Rerun(..))));

    let graph = h.graph(&graph_id).await;
    assert_eq!(graph.state, GraphState::Blocked);
    match &h.publisher.published()[0] {
        OutboundEvent::TaskGraphBlocked { task_id, routing: event_routing, .. } => {
            assert_eq!(task_id, &TaskId::new("b"));
            assert_eq!(event_routing, &routing);
        }
        other => panic!("expected TaskGraphBlocked, got {other:?}"),
    }

    // A hard failure never completed (spec §4.5 step 1): `{completed:
    // false, success: false}`, distinct from a budget-exhausted soft
    // failure.
    let b = h.task(&graph_id, &TaskId::new("b")).await;
    let resolution = b.resolution.expect("b should be resolved");
    assert!(!resolution.completed);
    assert!(!resolution.success);
}

#[tokio::test]
async fn duplicate_completion_delivery_is_idempotent() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-dup");
    let _routing = seed_linear_chain(&h.store, &graph_id, 0);

    for task_id in ["a", "b", "c"] {
        h.engine
            .handle_task_completed(graph_id.clone(), TaskId::new(task_id), None, None)
            .await
            .unwrap();
    }

    // Redeliver the final completion. It must not re-finish or re-publish.
    h.engine
        .handle_task_completed(graph_id.clone(), TaskId::new("c"), None, None)
        .await
        .unwrap();

    assert_eq!(h.publisher.published().len(), 1);
}

#[tokio::test]
async fn concurrent_completion_of_last_two_leaves_finishes_once() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-diamond");
    let routing = seed_diamond(&h.store, &graph_id);

    let left = h
        .engine
        .handle_task_completed(graph_id.clone(), TaskId::new("left"), None, None);
    let right = h
        .engine
        .handle_task_completed(graph_id.clone(), TaskId::new("right"), None, None);
    let (left, right) = tokio::join!(left, right);
    left.unwrap();
    right.unwrap();

    let graph = h.graph(&graph_id).await;
    assert_eq!(graph.state, GraphState::Finished);
    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    match &published[0] {
        OutboundEvent::TaskGraphFinished { routing: event_routing, .. } => {
            assert_eq!(event_routing, &routing);
        }
        other => panic!("expected TaskGraphFinished, got {other:?}"),
    }
}

#[tokio::test]
async fn already_blocked_graph_ignores_further_failures() {
    let h = Harness::new();
    let graph_id = GraphId::new("g-blocked");
    let _routing = seed_linear_chain(&h.store, &graph_id, 0);

    h.engine
        .handle_task_completed(graph_id.clone(), TaskId::new("a"), None, None)
        .await
        .unwrap();
    h.engine
        .handle_task_failed(graph_id.clone(), TaskId::new("b"), true, None, None)
        .await
        .unwrap();
    assert_eq!(h.publisher.published().len(), 1);

    // A second, unrelated task in the same already-blocked graph fails hard.
    h.engine
        .handle_task_failed(graph_id.clone(), TaskId::new("c"), true, None, None)
        .await
        .unwrap();

    assert_eq!(h.publisher.published().len(), 1);
}

/// A `task-completed` message with `success=false` must be routed through
/// the rerun-vs-block budget check (spec §4.3/§4.6), never treated as a
/// successful completion, exercised through the real `Dispatcher` so the
/// wire-level routing decision is covered, not just the progression engine.
#[tokio::test]
async fn soft_failure_completion_event_consumes_rerun_budget() {
    let store = Arc::new(InMemoryEntityStore::new());
    let queue = Arc::new(InMemoryExecutionQueue::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let graph_id = GraphId::new("g-soft");
    let routing = seed_linear_chain(&store, &graph_id, 1);

    let engine = Arc::new(ProgressionEngine::new(
        store.clone() as Arc<dyn TaskStore>,
        store.clone() as Arc<dyn TaskGraphStore>,
        queue.clone() as Arc<dyn taskflow_core::ExecutionQueueClient>,
        publisher.clone() as Arc<dyn taskflow_core::EventPublisher>,
        None,
    ));
    let broker = Arc::new(InMemoryBroker::new());
    let dispatcher = Dispatcher::new(broker.clone() as Arc<dyn BrokerIngress>, engine, 8);

    let event = InboundEvent::TaskCompleted {
        task_graph_id: graph_id.clone(),
        task_id: TaskId::new("b"),
        success: false,
        result_url: None,
        logs_url: None,
    };
    let payload = serde_json::to_value(&event).unwrap();
    dispatcher
        .dispatch(RawMessage {
            routing_key: format!("{routing}.taskCompleted"),
            payload,
        })
        .await;

    // Budget consumed, no terminal event, task still live, exactly as a
    // `task-failed, hard=false` delivery would have behaved.
    assert_eq!(
        queue.calls(),
        vec![QueueCall::Rerun(graph_id.clone(), TaskId::new("b"))]
    );
    assert!(publisher.published().is_empty());
    let b = TaskStore::load(
        store.as_ref(),
        &taskflow_core::TaskKey::new(graph_id.clone(), TaskId::new("b")),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(b.resolution.is_none());
    assert_eq!(b.reruns_left, 0);
}
