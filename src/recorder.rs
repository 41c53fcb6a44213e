#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{HarvestError, Result};
use crate::store::ResultStore;
use crate::types::{FailureReason, TaskId, WorkItemId, WorkItemOutcome};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { task_done: bool },
    /// A result already existed, or the work item was deleted meanwhile.
    Duplicate,
}

/// Write-once persistence of work item outcomes plus the task status flip.
#[derive(Debug, Clone)]
pub struct ResultRecorder<S> {
    store: S,
}

impl<S> ResultRecorder<S>
where
    S: ResultStore,
{
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// # Errors
    /// Propagates store failures.
    pub async fn record(
        &self,
        task_id: TaskId,
        work_item_id: WorkItemId,
        outcome: &WorkItemOutcome,
    ) -> Result<RecordOutcome> {
        let inserted = self
            .store
            .insert_result(task_id, work_item_id, outcome)
            .await?;
        if !inserted {
            warn!(
                "Result for work item {} of task {} already recorded, ignoring duplicate",
                work_item_id, task_id
            );
        }

        // A previous delivery may have stored the result and died before this flip.
        let task_done = self.store.complete_task_if_settled(task_id).await?;
        if task_done {
            info!("Task {} is done", task_id);
        }
        Ok(if inserted {
            RecordOutcome::Recorded { task_done }
        } else {
            RecordOutcome::Duplicate
        })
    }

    /// Leaves a synthetic `unknown` failure behind for traceability and marks
    /// the task as errored.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn abort(
        &self,
        task_id: TaskId,
        work_item_id: WorkItemId,
        error: &HarvestError,
    ) -> Result<()> {
        let outcome = WorkItemOutcome::failure(
            FailureReason::Unknown,
            format!("orchestration failed: {error}"),
        );
        self.store
            .insert_result(task_id, work_item_id, &outcome)
            .await?;
        if self.store.fail_task(task_id).await? {
            warn!("Task {} marked as error: {}", task_id, error);
        }
        Ok(())
    }
}
