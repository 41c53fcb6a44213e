#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Narrow persistence ports used by the core. `HarvestDb` implements them over
//! Postgres, `MemoryStore` keeps everything in process.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{
    Credential, CredentialHealth, CredentialId, Egress, NewTask, TaskHandle, TaskId, TaskRef,
    TaskReport, WorkItem, WorkItemId, WorkItemOutcome,
};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait CredentialStore: Send + Sync {
    fn active_credential_count(&self) -> StoreFuture<'_, u32>;

    /// Lowest usage first, then oldest registration, skipping `excluded`.
    fn select_credential<'a>(
        &'a self,
        excluded: &'a [CredentialId],
    ) -> StoreFuture<'a, Option<Credential>>;

    /// Returns the bound egress, binding the least-loaded one first if the
    /// credential has none. Binding is persisted before returning.
    fn assign_egress<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, Option<Egress>>;

    /// Returns `false` when the write was refused (leaving `Banned`) or the
    /// credential no longer exists.
    fn transition_health(
        &self,
        credential_id: CredentialId,
        health: CredentialHealth,
    ) -> StoreFuture<'_, bool>;

    /// Increments and returns the usage counter.
    fn record_usage(&self, credential_id: CredentialId) -> StoreFuture<'_, u64>;

    /// Administrative: puts a `Banned`/`Errored` credential back to `Active`.
    fn reset_health<'a>(&'a self, login: &'a str) -> StoreFuture<'a, Option<Credential>>;
}

pub trait TaskStore: Send + Sync {
    fn submit_task<'a>(&'a self, task: &'a NewTask) -> StoreFuture<'a, TaskHandle>;

    fn task_report(&self, task: TaskRef) -> StoreFuture<'_, Option<TaskReport>>;

    fn delete_task(&self, task: TaskRef) -> StoreFuture<'_, bool>;

    /// Leases the oldest unsettled work item that is not currently leased.
    fn lease_next_work_item<'a>(
        &'a self,
        worker: &'a str,
        lease: Duration,
    ) -> StoreFuture<'a, Option<WorkItem>>;

    fn release_expired_leases(&self) -> StoreFuture<'_, u32>;
}

pub trait ResultStore: Send + Sync {
    /// Write-once per work item. Returns `false` when a result already exists
    /// or the work item is gone.
    fn insert_result<'a>(
        &'a self,
        task_id: TaskId,
        work_item_id: WorkItemId,
        outcome: &'a WorkItemOutcome,
    ) -> StoreFuture<'a, bool>;

    /// Flips `Pending -> Done` iff every work item of the task has a result.
    fn complete_task_if_settled(&self, task_id: TaskId) -> StoreFuture<'_, bool>;

    /// Flips every `Pending` task whose work items all have results to `Done`.
    /// Returns the number of tasks flipped.
    fn complete_settled_tasks(&self) -> StoreFuture<'_, u32>;

    /// Flips `Pending -> Error`.
    fn fail_task(&self, task_id: TaskId) -> StoreFuture<'_, bool>;
}

/// Read-only copy of everything a worker would touch: the credential pool and
/// the unsettled work items of pending tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub credentials: Vec<Credential>,
    pub egresses: Vec<Egress>,
    pub tasks: Vec<TaskHandle>,
    pub work_items: Vec<WorkItem>,
}

pub trait SnapshotStore: Send + Sync {
    /// Reads without writing anything.
    fn snapshot(&self) -> StoreFuture<'_, QueueSnapshot>;
}
