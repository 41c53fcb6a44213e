use super::HarvestDb;
use crate::error::HarvestError;
use crate::store::{ResultStore, StoreFuture};
use crate::types::{TaskId, WorkItemId, WorkItemOutcome};

impl ResultStore for HarvestDb {
    fn insert_result<'a>(
        &'a self,
        task_id: TaskId,
        work_item_id: WorkItemId,
        outcome: &'a WorkItemOutcome,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let payload = serde_json::to_string(outcome)?;
            sqlx::query(
                "INSERT INTO results (task_id, work_item_id, outcome, payload)
                 SELECT w.task_id, w.id, $3, $4::jsonb
                 FROM work_items w
                 WHERE w.id = $2 AND w.task_id = $1
                 ON CONFLICT (work_item_id) DO NOTHING",
            )
            .bind(task_id.value())
            .bind(work_item_id.value())
            .bind(outcome.kind_str())
            .bind(payload)
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to insert result: {e}")))
        })
    }

    fn complete_task_if_settled(&self, task_id: TaskId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE tasks t SET status = 'done'
                 WHERE t.id = $1
                   AND t.status = 'pending'
                   AND NOT EXISTS (
                       SELECT 1 FROM work_items w
                       WHERE w.task_id = t.id
                         AND NOT EXISTS (SELECT 1 FROM results r WHERE r.work_item_id = w.id)
                   )",
            )
            .bind(task_id.value())
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to complete task: {e}")))
        })
    }

    fn complete_settled_tasks(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE tasks t SET status = 'done'
                 WHERE t.status = 'pending'
                   AND NOT EXISTS (
                       SELECT 1 FROM work_items w
                       WHERE w.task_id = t.id
                         AND NOT EXISTS (SELECT 1 FROM results r WHERE r.work_item_id = w.id)
                   )",
            )
            .execute(self.pool())
            .await
            .map(|result| u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
            .map_err(|e| {
                HarvestError::DatabaseError(format!("Failed to complete settled tasks: {e}"))
            })
        })
    }

    fn fail_task(&self, task_id: TaskId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            sqlx::query("UPDATE tasks SET status = 'error' WHERE id = $1 AND status = 'pending'")
                .bind(task_id.value())
                .execute(self.pool())
                .await
                .map(|result| result.rows_affected() > 0)
                .map_err(|e| HarvestError::DatabaseError(format!("Failed to fail task: {e}")))
        })
    }
}
