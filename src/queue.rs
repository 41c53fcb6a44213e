#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Operations exposed to the outer surface: submit work, read it back, and
//! the administrative health reset.

use crate::error::{HarvestError, Result};
use crate::store::{CredentialStore, TaskStore};
use crate::types::{Credential, NewTask, TaskHandle, TaskRef, TaskReport};
use tracing::info;

#[derive(Debug, Clone)]
pub struct HarvestQueue<S> {
    store: S,
}

impl<S> HarvestQueue<S>
where
    S: TaskStore + CredentialStore,
{
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Stores the task and its work items; workers pick them up later.
    ///
    /// # Errors
    /// Returns `InvalidInput` for an empty or malformed task, or a store error.
    pub async fn submit(&self, task: &NewTask) -> Result<TaskHandle> {
        task.validate().map_err(HarvestError::InvalidInput)?;
        let handle = self.store.submit_task(task).await?;
        info!(
            "Submitted task {} ({}) with {} work item(s)",
            handle.id,
            handle.correlation_id,
            task.items.len()
        );
        Ok(handle)
    }

    /// # Errors
    /// Returns `TaskNotFound` when no task matches.
    pub async fn status(&self, task: TaskRef) -> Result<TaskReport> {
        self.store
            .task_report(task)
            .await?
            .ok_or_else(|| HarvestError::TaskNotFound(task.to_string()))
    }

    /// # Errors
    /// Returns `TaskNotFound` when no task matches.
    pub async fn delete(&self, task: TaskRef) -> Result<()> {
        if self.store.delete_task(task).await? {
            info!("Deleted task {}", task);
            Ok(())
        } else {
            Err(HarvestError::TaskNotFound(task.to_string()))
        }
    }

    /// # Errors
    /// Returns `CredentialNotFound` when the login is unknown.
    pub async fn reset_health(&self, login: &str) -> Result<Credential> {
        let credential = self
            .store
            .reset_health(login)
            .await?
            .ok_or_else(|| HarvestError::CredentialNotFound(login.to_string()))?;
        info!("Credential {} reset to {}", credential.login, credential.health);
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::HarvestQueue;
    use crate::error::HarvestError;
    use crate::store::MemoryStore;
    use crate::types::{CredentialHealth, NewTask, SortOrder, TaskRef, TaskStatus};

    fn queue() -> (MemoryStore, HarvestQueue<MemoryStore>) {
        let store = MemoryStore::new();
        (store.clone(), HarvestQueue::new(store))
    }

    #[tokio::test]
    async fn when_submitted_then_status_is_pending_by_id_and_by_correlation() {
        let (_, queue) = queue();
        let task = NewTask::uniform(
            &["https://t.me/a/1".to_string(), "https://t.me/a/2".to_string()],
            50,
            SortOrder::Desc,
        );

        let handle = queue
            .submit(&task)
            .await
            .unwrap_or_else(|e| unreachable!("submit failed: {e}"));

        let by_id = queue.status(TaskRef::Id(handle.id)).await.ok();
        let by_uuid = queue
            .status(TaskRef::Correlation(handle.correlation_id))
            .await
            .ok();
        assert_eq!(by_id.as_ref().map(|r| r.status), Some(TaskStatus::Pending));
        assert_eq!(by_id.as_ref().map(|r| r.pending_items()), Some(2));
        assert_eq!(by_id, by_uuid);
    }

    #[tokio::test]
    async fn when_task_is_empty_then_submit_is_rejected() {
        let (_, queue) = queue();
        let result = queue.submit(&NewTask { items: Vec::new() }).await;
        assert!(matches!(result, Err(HarvestError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn when_deleted_then_status_is_not_found() {
        let (_, queue) = queue();
        let task = NewTask::uniform(&["https://t.me/a/1".to_string()], 10, SortOrder::Asc);
        let handle = queue
            .submit(&task)
            .await
            .unwrap_or_else(|e| unreachable!("submit failed: {e}"));

        assert!(queue.delete(TaskRef::Id(handle.id)).await.is_ok());
        assert!(matches!(
            queue.status(TaskRef::Id(handle.id)).await,
            Err(HarvestError::TaskNotFound(_))
        ));
        assert!(queue.delete(TaskRef::Id(handle.id)).await.is_err());
    }

    #[tokio::test]
    async fn when_resetting_a_banned_login_then_it_becomes_active() {
        let (store, queue) = queue();
        let credential = store.register_credential("+10000000001").await;
        store.set_health(credential.id, CredentialHealth::Banned).await;

        let reset = queue.reset_health("+10000000001").await.ok();
        assert_eq!(reset.map(|c| c.health), Some(CredentialHealth::Active));
        assert!(matches!(
            queue.reset_health("+19999999999").await,
            Err(HarvestError::CredentialNotFound(_))
        ));
    }
}
