use super::rows::{
    credential_from_row, egress_from_row, work_item_from_row, CredentialRow, EgressRow,
    WorkItemRow, CREDENTIAL_COLUMNS, EGRESS_COLUMNS,
};
use super::HarvestDb;
use crate::error::{HarvestError, Result};
use crate::store::{QueueSnapshot, SnapshotStore, StoreFuture};
use crate::types::{TaskHandle, TaskId};
use uuid::Uuid;

impl SnapshotStore for HarvestDb {
    fn snapshot(&self) -> StoreFuture<'_, QueueSnapshot> {
        Box::pin(async move {
            let credentials = sqlx::query_as::<_, CredentialRow>(&format!(
                "SELECT {CREDENTIAL_COLUMNS} FROM credentials ORDER BY id"
            ))
            .fetch_all(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to read credentials: {e}")))?
            .into_iter()
            .map(credential_from_row)
            .collect::<Result<Vec<_>>>()?;

            let egresses = sqlx::query_as::<_, EgressRow>(&format!(
                "SELECT {EGRESS_COLUMNS} FROM egresses ORDER BY id"
            ))
            .fetch_all(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to read egresses: {e}")))?
            .into_iter()
            .map(egress_from_row)
            .collect::<Result<Vec<_>>>()?;

            let tasks = sqlx::query_as::<_, (i64, Uuid)>(
                "SELECT id, correlation_id FROM tasks WHERE status = 'pending' ORDER BY id",
            )
            .fetch_all(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to read tasks: {e}")))?
            .into_iter()
            .map(|(id, correlation_id)| TaskHandle {
                id: TaskId::new(id),
                correlation_id,
            })
            .collect();

            let work_items = sqlx::query_as::<_, WorkItemRow>(
                "SELECT w.id, w.task_id, w.locator, w.result_limit, w.sort_order
                 FROM work_items w
                 JOIN tasks t ON t.id = w.task_id
                 WHERE t.status = 'pending'
                   AND NOT EXISTS (SELECT 1 FROM results r WHERE r.work_item_id = w.id)
                 ORDER BY w.id",
            )
            .fetch_all(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to read work items: {e}")))?
            .into_iter()
            .map(work_item_from_row)
            .collect::<Result<Vec<_>>>()?;

            Ok(QueueSnapshot {
                credentials,
                egresses,
                tasks,
                work_items,
            })
        })
    }
}
