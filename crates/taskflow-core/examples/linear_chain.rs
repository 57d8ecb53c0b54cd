//! Drives a three-task linear chain (`a -> b -> c`) to completion against
//! the in-memory backends, printing each terminal event as it publishes.
//!
//! Run with `cargo run -p taskflow-core --example linear_chain`.

use std::collections::HashSet;
use std::sync::Arc;

use taskflow_core::{
    EventPublisher, ExecutionQueueClient, GraphId, InMemoryEntityStore, InMemoryExecutionQueue,
    ProgressionEngine, RecordingPublisher, Task, TaskGraph, TaskGraphStore, TaskId, TaskStore,
};

#[tokio::main]
async fn main() {
    let store = Arc::new(InMemoryEntityStore::new());
    let queue: Arc<dyn ExecutionQueueClient> = Arc::new(InMemoryExecutionQueue::new());
    let publisher = Arc::new(RecordingPublisher::new());

    let graph_id = GraphId::new("example-graph");
    let routing = format!("default.{graph_id}");

    let mut a = Task::new(graph_id.clone(), TaskId::new("a"), 0);
    a.dependents.insert(TaskId::new("b"));
    let mut b = Task::new(graph_id.clone(), TaskId::new("b"), 1);
    b.requires.insert(TaskId::new("a"));
    b.dependents.insert(TaskId::new("c"));
    let mut c = Task::new(graph_id.clone(), TaskId::new("c"), 1);
    c.requires.insert(TaskId::new("b"));

    store.put_task(a);
    store.put_task(b);
    store.put_task(c);

    let mut leaves = HashSet::new();
    leaves.insert(TaskId::new("c"));
    store.put_graph(TaskGraph::new(graph_id.clone(), routing.clone(), leaves));

    let engine = ProgressionEngine::new(
        store.clone() as Arc<dyn TaskStore>,
        store.clone() as Arc<dyn TaskGraphStore>,
        queue,
        publisher.clone() as Arc<dyn EventPublisher>,
        None,
    );

    for task_id in ["a", "b", "c"] {
        engine
            .handle_task_completed(graph_id.clone(), TaskId::new(task_id), None, None)
            .await
            .expect("handler should succeed");
        println!("{task_id} completed");
    }

    for event in publisher.published() {
        println!("published: {event:?}");
    }
}
