#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Dry runs: the queue is copied into a `MemoryStore` and drained there, so
//! the source store only ever sees reads.

use crate::error::Result;
use crate::gateway::{ClientFactory, SessionGateway};
use crate::store::{MemoryStore, SnapshotStore, TaskStore};
use crate::types::{TaskRef, TaskReport};
use crate::worker::{WorkerPool, WorkerSettings};
use tracing::info;

/// Runs every unsettled work item of `source` through the worker pipeline
/// against a private copy and returns the resulting task reports.
///
/// # Errors
/// Returns an error if the snapshot cannot be read or the copy fails.
pub async fn rehearse<S, F>(
    source: &S,
    gateway: SessionGateway<F>,
    settings: WorkerSettings,
) -> Result<Vec<TaskReport>>
where
    S: SnapshotStore,
    F: ClientFactory + 'static,
    F::Client: 'static,
{
    let snapshot = source.snapshot().await?;
    info!(
        "Dry run over {} work item(s) with {} credential(s)",
        snapshot.work_items.len(),
        snapshot.credentials.len()
    );

    let copy = MemoryStore::from_snapshot(&snapshot);
    WorkerPool::new(copy.clone(), gateway, settings)
        .drain("dry-run")
        .await?;

    let mut reports = Vec::with_capacity(snapshot.tasks.len());
    for handle in &snapshot.tasks {
        if let Some(report) = copy.task_report(TaskRef::Id(handle.id)).await? {
            reports.push(report);
        }
    }
    Ok(reports)
}
