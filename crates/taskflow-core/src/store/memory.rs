use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{HandlerError, StoreError};
use crate::model::{GraphId, Task, TaskGraph, TaskKey};

use super::{GraphMutator, TaskGraphStore, TaskMutator, TaskStore};

/// In-memory, `DashMap`-backed entity store. Used by tests and as the
/// default for local/dev runs; production deployments plug a durable
/// backend in behind [`TaskStore`]/[`TaskGraphStore`].
#[derive(Default)]
pub struct InMemoryEntityStore {
    tasks: DashMap<TaskKey, (Task, u64)>,
    graphs: DashMap<GraphId, (TaskGraph, u64)>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a task directly, bypassing the mutator path. Used by tests and
    /// by graph submission to populate the initial DAG.
    pub fn put_task(&self, task: Task) {
        let key = task.key();
        match self.tasks.entry(key) {
            Entry::Occupied(mut e) => {
                let version = e.get().1;
                e.insert((task, version + 1));
            }
            Entry::Vacant(e) => {
                e.insert((task, 1));
            }
        }
    }

    /// Seed a graph directly, bypassing the mutator path.
    pub fn put_graph(&self, graph: TaskGraph) {
        let id = graph.task_graph_id.clone();
        match self.graphs.entry(id) {
            Entry::Occupied(mut e) => {
                let version = e.get().1;
                e.insert((graph, version + 1));
            }
            Entry::Vacant(e) => {
                e.insert((graph, 1));
            }
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryEntityStore {
    async fn load(&self, key: &TaskKey) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(key).map(|entry| entry.value().0.clone()))
    }

    async fn modify(&self, key: &TaskKey, mutator: &TaskMutator<'_>) -> Result<Task, HandlerError> {
        loop {
            let current_version = self.tasks.get(key).map(|entry| entry.value().1);
            let current = self.tasks.get(key).map(|entry| entry.value().0.clone());
            let candidate = mutator(current)?;

            match self.tasks.entry(key.clone()) {
                Entry::Occupied(mut e) => {
                    if Some(e.get().1) == current_version {
                        let next_version = e.get().1 + 1;
                        e.insert((candidate.clone(), next_version));
                        return Ok(candidate);
                    }
                    // lost the race, reload and retry
                }
                Entry::Vacant(e) => {
                    if current_version.is_none() {
                        e.insert((candidate.clone(), 1));
                        return Ok(candidate);
                    }
                    // entity disappeared under us, retry against fresh state
                }
            }
        }
    }
}

#[async_trait]
impl TaskGraphStore for InMemoryEntityStore {
    async fn load(&self, id: &GraphId) -> Result<Option<TaskGraph>, StoreError> {
        Ok(self.graphs.get(id).map(|entry| entry.value().0.clone()))
    }

    async fn modify(
        &self,
        id: &GraphId,
        mutator: &GraphMutator<'_>,
    ) -> Result<TaskGraph, HandlerError> {
        loop {
            let current_version = self.graphs.get(id).map(|entry| entry.value().1);
            let current = self.graphs.get(id).map(|entry| entry.value().0.clone());
            let candidate = mutator(current)?;

            match self.graphs.entry(id.clone()) {
                Entry::Occupied(mut e) => {
                    if Some(e.get().1) == current_version {
                        let next_version = e.get().1 + 1;
                        e.insert((candidate.clone(), next_version));
                        return Ok(candidate);
                    }
                }
                Entry::Vacant(e) => {
                    if current_version.is_none() {
                        e.insert((candidate.clone(), 1));
                        return Ok(candidate);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GraphState, TaskId};
    use std::collections::HashSet;

    #[tokio::test]
    async fn modify_creates_when_absent() {
        let store = InMemoryEntityStore::new();
        let key = TaskKey::new(GraphId::new("g1"), TaskId::new("t1"));
        let result = TaskStore::modify(
            &store,
            &key,
            &|existing| {
                assert!(existing.is_none());
                Ok(Task::new(GraphId::new("g1"), TaskId::new("t1"), 2))
            },
        )
        .await
        .expect("modify should succeed");
        assert_eq!(result.reruns_left, 2);
    }

    #[tokio::test]
    async fn modify_sees_prior_write() {
        let store = InMemoryEntityStore::new();
        let key = TaskKey::new(GraphId::new("g1"), TaskId::new("t1"));
        store.put_task(Task::new(GraphId::new("g1"), TaskId::new("t1"), 3));

        let result = TaskStore::modify(&store, &key, &|existing| {
            let mut task = existing.expect("task should exist");
            task.reruns_left -= 1;
            Ok(task)
        })
        .await
        .expect("modify should succeed");
        assert_eq!(result.reruns_left, 2);
    }

    #[tokio::test]
    async fn graph_modify_round_trips() {
        let store = InMemoryEntityStore::new();
        let id = GraphId::new("g1");
        let mut leaves = HashSet::new();
        leaves.insert(TaskId::new("t1"));
        store.put_graph(TaskGraph::new(id.clone(), "sched.g1", leaves));

        let result = TaskGraphStore::modify(&store, &id, &|existing| {
            let mut graph = existing.expect("graph should exist");
            graph.state = GraphState::Finished;
            Ok(graph)
        })
        .await
        .expect("modify should succeed");
        assert_eq!(result.state, GraphState::Finished);
    }
}
