//! Entity schema for the task-graph scheduler: [`Task`] and [`TaskGraph`],
//! and the small value types they are built from.
//!
//! These types describe the logical schema only. Storage concerns —
//! versioning, compare-and-swap — live in [`crate::store`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a task graph, unique across the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(pub String);

impl GraphId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a task, unique within its graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite key identifying a task within the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub task_graph_id: GraphId,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn new(task_graph_id: GraphId, task_id: TaskId) -> Self {
        Self {
            task_graph_id,
            task_id,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.task_graph_id, self.task_id)
    }
}

/// Lifecycle state of a [`TaskGraph`]. `Blocked` and `Finished` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Running,
    Blocked,
    Finished,
}

impl GraphState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GraphState::Blocked | GraphState::Finished)
    }
}

/// A task's terminal outcome. Presence on a [`Task`] marks it no longer live.
///
/// Invariant: `success == true` implies `completed == true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub completed: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_url: Option<String>,
}

impl Resolution {
    pub fn success(result_url: Option<String>, logs_url: Option<String>) -> Self {
        Self {
            completed: true,
            success: true,
            result_url,
            logs_url,
        }
    }

    pub fn soft_failure(result_url: Option<String>, logs_url: Option<String>) -> Self {
        Self {
            completed: true,
            success: false,
            result_url,
            logs_url,
        }
    }

    pub fn hard_failure() -> Self {
        Self {
            completed: false,
            success: false,
            result_url: None,
            logs_url: None,
        }
    }
}

/// A single task within a [`TaskGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_graph_id: GraphId,
    pub task_id: TaskId,
    pub reruns_left: u32,
    pub dependents: HashSet<TaskId>,
    pub requires: HashSet<TaskId>,
    pub resolution: Option<Resolution>,
}

impl Task {
    pub fn new(task_graph_id: GraphId, task_id: TaskId, reruns_left: u32) -> Self {
        Self {
            task_graph_id,
            task_id,
            reruns_left,
            dependents: HashSet::new(),
            requires: HashSet::new(),
            resolution: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_graph_id.clone(), self.task_id.clone())
    }

    pub fn is_leaf(&self) -> bool {
        self.dependents.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.resolution.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.resolution
            .as_ref()
            .map(|r| r.success)
            .unwrap_or(false)
    }
}

/// A directed acyclic graph of tasks, submitted as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub task_graph_id: GraphId,
    pub state: GraphState,
    pub requires_left: HashSet<TaskId>,
    pub routing: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: serde_json::Map<String, serde_json::Value>,
}

impl TaskGraph {
    pub fn new(task_graph_id: GraphId, routing: impl Into<String>, leaves: HashSet<TaskId>) -> Self {
        Self {
            task_graph_id,
            state: GraphState::Running,
            requires_left: leaves,
            routing: routing.into(),
            scopes: Vec::new(),
            metadata: serde_json::Map::new(),
            tags: serde_json::Map::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == GraphState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_success_implies_completed() {
        let r = Resolution::success(None, None);
        assert!(r.completed);
        assert!(r.success);
    }

    #[test]
    fn leaf_task_has_no_dependents() {
        let task = Task::new(GraphId::new("g1"), TaskId::new("t1"), 0);
        assert!(task.is_leaf());
        assert!(task.is_live());
    }

    #[test]
    fn task_key_display_is_graph_slash_task() {
        let key = TaskKey::new(GraphId::new("g1"), TaskId::new("t1"));
        assert_eq!(key.to_string(), "g1/t1");
    }
}
