use super::rows::{
    result_from_row, task_status_from_row, work_item_from_row, ResultRow, TaskRow, WorkItemRow,
    WORK_ITEM_COLUMNS,
};
use super::HarvestDb;
use crate::error::{HarvestError, Result};
use crate::store::{StoreFuture, TaskStore};
use crate::types::{NewTask, TaskHandle, TaskId, TaskRef, TaskReport, WorkItem};
use sqlx::Acquire;
use std::time::Duration;
use uuid::Uuid;

impl HarvestDb {
    async fn find_task(&self, task: TaskRef) -> Result<Option<TaskRow>> {
        let query = match task {
            TaskRef::Id(id) => sqlx::query_as::<_, TaskRow>(
                "SELECT id, correlation_id, status, created_at FROM tasks WHERE id = $1",
            )
            .bind(id.value()),
            TaskRef::Correlation(uuid) => sqlx::query_as::<_, TaskRow>(
                "SELECT id, correlation_id, status, created_at FROM tasks WHERE correlation_id = $1",
            )
            .bind(uuid),
        };
        query
            .fetch_optional(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to load task {task}: {e}")))
    }

    async fn work_item_count(&self, task_id: TaskId) -> Result<u32> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM work_items WHERE task_id = $1")
            .bind(task_id.value())
            .fetch_one(self.pool())
            .await
            .map(|count| u32::try_from(count).unwrap_or(u32::MAX))
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to count work items: {e}")))
    }

    /// Results in completion order.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored payload does not parse.
    pub async fn task_results(&self, task_id: TaskId) -> Result<Vec<crate::types::StoredResult>> {
        sqlx::query_as::<_, ResultRow>(
            "SELECT r.id, r.task_id, r.work_item_id, w.locator, r.payload::text, r.recorded_at
             FROM results r
             JOIN work_items w ON w.id = r.work_item_id
             WHERE r.task_id = $1
             ORDER BY r.id",
        )
        .bind(task_id.value())
        .fetch_all(self.pool())
        .await
        .map_err(|e| HarvestError::DatabaseError(format!("Failed to load results: {e}")))?
        .into_iter()
        .map(result_from_row)
        .collect()
    }
}

impl TaskStore for HarvestDb {
    fn submit_task<'a>(&'a self, task: &'a NewTask) -> StoreFuture<'a, TaskHandle> {
        Box::pin(async move {
            task.validate().map_err(HarvestError::InvalidInput)?;
            let correlation_id = Uuid::new_v4();
            let locators: Vec<String> = task.items.iter().map(|i| i.locator.clone()).collect();
            let limits: Vec<i32> = task
                .items
                .iter()
                .map(|i| i32::try_from(i.limit).unwrap_or(i32::MAX))
                .collect();
            let orders: Vec<&str> = task.items.iter().map(|i| i.order.as_str()).collect();

            let mut tx = self
                .pool()
                .begin()
                .await
                .map_err(|e| HarvestError::DatabaseError(format!("Failed to begin tx: {e}")))?;
            let conn = tx.acquire().await.map_err(|e| {
                HarvestError::DatabaseError(format!("Failed to acquire tx conn: {e}"))
            })?;

            let task_id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO tasks (correlation_id) VALUES ($1) RETURNING id",
            )
            .bind(correlation_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to insert task: {e}")))?;

            sqlx::query(
                "INSERT INTO work_items (task_id, locator, result_limit, sort_order)
                 SELECT $1, locator, result_limit, sort_order
                 FROM UNNEST($2::text[], $3::int[], $4::text[])
                      WITH ORDINALITY AS items(locator, result_limit, sort_order, position)
                 ORDER BY position",
            )
            .bind(task_id)
            .bind(locators)
            .bind(limits)
            .bind(orders)
            .execute(&mut *conn)
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to insert work items: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| HarvestError::DatabaseError(format!("Failed to commit tx: {e}")))?;

            Ok(TaskHandle {
                id: TaskId::new(task_id),
                correlation_id,
            })
        })
    }

    fn task_report(&self, task: TaskRef) -> StoreFuture<'_, Option<TaskReport>> {
        Box::pin(async move {
            let Some((id, correlation_id, status, created_at)) = self.find_task(task).await? else {
                return Ok(None);
            };
            let id = TaskId::new(id);
            Ok(Some(TaskReport {
                id,
                correlation_id,
                status: task_status_from_row(&status)?,
                created_at,
                work_items: self.work_item_count(id).await?,
                results: self.task_results(id).await?,
            }))
        })
    }

    fn delete_task(&self, task: TaskRef) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let query = match task {
                TaskRef::Id(id) => sqlx::query("DELETE FROM tasks WHERE id = $1").bind(id.value()),
                TaskRef::Correlation(uuid) => {
                    sqlx::query("DELETE FROM tasks WHERE correlation_id = $1").bind(uuid)
                }
            };
            query
                .execute(self.pool())
                .await
                .map(|result| result.rows_affected() > 0)
                .map_err(|e| HarvestError::DatabaseError(format!("Failed to delete task: {e}")))
        })
    }

    fn lease_next_work_item<'a>(
        &'a self,
        worker: &'a str,
        lease: Duration,
    ) -> StoreFuture<'a, Option<WorkItem>> {
        Box::pin(async move {
            let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
            sqlx::query_as::<_, WorkItemRow>(&format!(
                "UPDATE work_items
                 SET leased_by = $1, leased_until = NOW() + ($2::float8 * INTERVAL '1 millisecond')
                 WHERE id = (
                     SELECT w.id
                     FROM work_items w
                     JOIN tasks t ON t.id = w.task_id
                     WHERE t.status = 'pending'
                       AND (w.leased_until IS NULL OR w.leased_until <= NOW())
                       AND NOT EXISTS (SELECT 1 FROM results r WHERE r.work_item_id = w.id)
                     ORDER BY w.id
                     LIMIT 1
                     FOR UPDATE OF w SKIP LOCKED
                 )
                 RETURNING {WORK_ITEM_COLUMNS}"
            ))
            .bind(worker)
            .bind(lease_ms)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to lease work item: {e}")))?
            .map(work_item_from_row)
            .transpose()
        })
    }

    fn release_expired_leases(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE work_items w
                 SET leased_by = NULL, leased_until = NULL
                 WHERE w.leased_until <= NOW()
                   AND NOT EXISTS (SELECT 1 FROM results r WHERE r.work_item_id = w.id)",
            )
            .execute(self.pool())
            .await
            .map(|result| u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to release leases: {e}")))
        })
    }
}
