//! Entity Store Adapter: `load`/`modify` access to [`Task`] and
//! [`TaskGraph`] entities behind optimistic-concurrency compare-and-swap.
//!
//! `modify`'s mutator must be pure and idempotent: it may be invoked more
//! than once for a single logical call if another writer wins the race, so
//! any "did this already happen" booleans the mutator derives must be
//! recomputed from the entity snapshot it receives, never carried over from
//! a previous attempt.

mod memory;

pub use memory::InMemoryEntityStore;

use async_trait::async_trait;

use crate::error::{HandlerError, StoreError};
use crate::model::{GraphId, Task, TaskGraph, TaskKey};

pub type TaskMutator<'a> = dyn Fn(Option<Task>) -> Result<Task, HandlerError> + Send + Sync + 'a;
pub type GraphMutator<'a> =
    dyn Fn(Option<TaskGraph>) -> Result<TaskGraph, HandlerError> + Send + Sync + 'a;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self, key: &TaskKey) -> Result<Option<Task>, StoreError>;

    /// Load the current task (or `None` if absent), run `mutator` over a
    /// clone, and attempt to write the result back with a compare-and-swap.
    /// On a concurrent writer beating this one to the write, reloads the
    /// fresh entity and reruns `mutator` against it.
    async fn modify(&self, key: &TaskKey, mutator: &TaskMutator<'_>) -> Result<Task, HandlerError>;
}

#[async_trait]
pub trait TaskGraphStore: Send + Sync {
    async fn load(&self, id: &GraphId) -> Result<Option<TaskGraph>, StoreError>;

    async fn modify(
        &self,
        id: &GraphId,
        mutator: &GraphMutator<'_>,
    ) -> Result<TaskGraph, HandlerError>;
}
