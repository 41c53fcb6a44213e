#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{HarvestError, Result};
use crate::pool::selection::{best_credential, least_bound_egress};
use crate::store::{
    CredentialStore, QueueSnapshot, ResultStore, SnapshotStore, StoreFuture, TaskStore,
};
use crate::types::{
    Credential, CredentialHealth, CredentialId, Egress, EgressId, EgressKind, NewTask,
    StoredResult, TaskHandle, TaskId, TaskRef, TaskReport, TaskStatus, WorkItem, WorkItemId,
    WorkItemOutcome,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TaskRow {
    id: TaskId,
    correlation_id: Uuid,
    status: TaskStatus,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct LeaseRow {
    item: WorkItem,
    leased_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    credentials: Vec<Credential>,
    egresses: Vec<Egress>,
    tasks: Vec<TaskRow>,
    work_items: Vec<LeaseRow>,
    results: Vec<StoredResult>,
    next_id: i64,
    egress_binding_writes: u32,
    unavailable: bool,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(HarvestError::DatabaseError(
                "memory store marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn find_task(&self, task: TaskRef) -> Option<&TaskRow> {
        self.tasks.iter().find(|row| match task {
            TaskRef::Id(id) => row.id == id,
            TaskRef::Correlation(uuid) => row.correlation_id == uuid,
        })
    }

    fn credential_mut(&mut self, id: CredentialId) -> Option<&mut Credential> {
        self.credentials.iter_mut().find(|c| c.id == id)
    }

    fn has_result(&self, work_item_id: WorkItemId) -> bool {
        self.results.iter().any(|r| r.work_item_id == work_item_id)
    }
}

/// In-process implementation of every store port. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store with the snapshot's rows, keeping their ids.
    #[must_use]
    pub fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        let now = Utc::now();
        let max_id = snapshot
            .credentials
            .iter()
            .map(|c| c.id.value())
            .chain(snapshot.egresses.iter().map(|e| e.id.value()))
            .chain(snapshot.tasks.iter().map(|t| t.id.value()))
            .chain(snapshot.work_items.iter().map(|w| w.id.value()))
            .max()
            .unwrap_or(0);
        let state = MemoryState {
            credentials: snapshot.credentials.clone(),
            egresses: snapshot.egresses.clone(),
            tasks: snapshot
                .tasks
                .iter()
                .map(|handle| TaskRow {
                    id: handle.id,
                    correlation_id: handle.correlation_id,
                    status: TaskStatus::Pending,
                    created_at: now,
                })
                .collect(),
            work_items: snapshot
                .work_items
                .iter()
                .map(|item| LeaseRow {
                    item: item.clone(),
                    leased_until: None,
                })
                .collect(),
            next_id: max_id,
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn register_credential(&self, login: &str) -> Credential {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        // Registration order must be strictly increasing even within one clock tick.
        let registered_at = Utc::now() + chrono::Duration::microseconds(id);
        let credential = Credential {
            id: CredentialId::new(id),
            login: login.to_string(),
            health: CredentialHealth::Active,
            usage_count: 0,
            egress_id: None,
            registered_at,
        };
        state.credentials.push(credential.clone());
        credential
    }

    pub async fn register_egress(&self, address: &str, port: u16, kind: EgressKind) -> Egress {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let egress = Egress {
            id: EgressId::new(id),
            kind,
            address: address.to_string(),
            port,
            username: None,
            secret: None,
        };
        state.egresses.push(egress.clone());
        egress
    }

    pub async fn set_usage(&self, credential_id: CredentialId, usage_count: u64) {
        if let Some(credential) = self.state.lock().await.credential_mut(credential_id) {
            credential.usage_count = usage_count;
        }
    }

    pub async fn set_health(&self, credential_id: CredentialId, health: CredentialHealth) {
        if let Some(credential) = self.state.lock().await.credential_mut(credential_id) {
            credential.health = health;
        }
    }

    pub async fn bind(&self, credential_id: CredentialId, egress_id: EgressId) {
        if let Some(credential) = self.state.lock().await.credential_mut(credential_id) {
            credential.egress_id = Some(egress_id);
        }
    }

    pub async fn credential(&self, credential_id: CredentialId) -> Option<Credential> {
        self.state
            .lock()
            .await
            .credentials
            .iter()
            .find(|c| c.id == credential_id)
            .cloned()
    }

    pub async fn work_items(&self, task_id: TaskId) -> Vec<WorkItem> {
        self.state
            .lock()
            .await
            .work_items
            .iter()
            .filter(|row| row.item.task_id == task_id)
            .map(|row| row.item.clone())
            .collect()
    }

    pub async fn egress_binding_writes(&self) -> u32 {
        self.state.lock().await.egress_binding_writes
    }

    /// Makes every subsequent call fail like an unreachable database.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

impl SnapshotStore for MemoryStore {
    fn snapshot(&self) -> StoreFuture<'_, QueueSnapshot> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_available()?;
            let tasks: Vec<TaskHandle> = state
                .tasks
                .iter()
                .filter(|row| row.status == TaskStatus::Pending)
                .map(|row| TaskHandle {
                    id: row.id,
                    correlation_id: row.correlation_id,
                })
                .collect();
            Ok(QueueSnapshot {
                credentials: state.credentials.clone(),
                egresses: state.egresses.clone(),
                work_items: state
                    .work_items
                    .iter()
                    .filter(|row| tasks.iter().any(|t| t.id == row.item.task_id))
                    .filter(|row| !state.has_result(row.item.id))
                    .map(|row| row.item.clone())
                    .collect(),
                tasks,
            })
        })
    }
}

impl CredentialStore for MemoryStore {
    fn active_credential_count(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_available()?;
            let active = state
                .credentials
                .iter()
                .filter(|c| c.health.is_selectable())
                .count();
            Ok(u32::try_from(active).unwrap_or(u32::MAX))
        })
    }

    fn select_credential<'a>(
        &'a self,
        excluded: &'a [CredentialId],
    ) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_available()?;
            Ok(best_credential(&state.credentials, excluded).cloned())
        })
    }

    fn assign_egress<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, Option<Egress>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;

            let bound = state
                .credentials
                .iter()
                .find(|c| c.id == credential.id)
                .and_then(|c| c.egress_id);

            if let Some(egress_id) = bound {
                return Ok(state.egresses.iter().find(|e| e.id == egress_id).cloned());
            }

            let Some(chosen) = least_bound_egress(&state.egresses, &state.credentials).cloned()
            else {
                return Ok(None);
            };

            if let Some(row) = state.credential_mut(credential.id) {
                row.egress_id = Some(chosen.id);
            }
            state.egress_binding_writes += 1;
            Ok(Some(chosen))
        })
    }

    fn transition_health(
        &self,
        credential_id: CredentialId,
        health: CredentialHealth,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            Ok(state
                .credential_mut(credential_id)
                .filter(|c| c.health.can_transition_to(health))
                .map(|c| c.health = health)
                .is_some())
        })
    }

    fn record_usage(&self, credential_id: CredentialId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            state
                .credential_mut(credential_id)
                .map(|c| {
                    c.usage_count = c.usage_count.saturating_add(1);
                    c.usage_count
                })
                .ok_or_else(|| HarvestError::CredentialNotFound(credential_id.to_string()))
        })
    }

    fn reset_health<'a>(&'a self, login: &'a str) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            Ok(state
                .credentials
                .iter_mut()
                .find(|c| c.login == login)
                .map(|c| {
                    c.health = CredentialHealth::Active;
                    c.clone()
                }))
        })
    }
}

impl TaskStore for MemoryStore {
    fn submit_task<'a>(&'a self, task: &'a NewTask) -> StoreFuture<'a, TaskHandle> {
        Box::pin(async move {
            task.validate().map_err(HarvestError::InvalidInput)?;
            let mut state = self.state.lock().await;
            state.check_available()?;

            let task_id = TaskId::new(state.next_id());
            let correlation_id = Uuid::new_v4();
            state.tasks.push(TaskRow {
                id: task_id,
                correlation_id,
                status: TaskStatus::Pending,
                created_at: Utc::now(),
            });
            for item in &task.items {
                let id = WorkItemId::new(state.next_id());
                state.work_items.push(LeaseRow {
                    item: WorkItem {
                        id,
                        task_id,
                        locator: item.locator.clone(),
                        limit: item.limit,
                        order: item.order,
                    },
                    leased_until: None,
                });
            }
            Ok(TaskHandle {
                id: task_id,
                correlation_id,
            })
        })
    }

    fn task_report(&self, task: TaskRef) -> StoreFuture<'_, Option<TaskReport>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.check_available()?;
            Ok(state.find_task(task).map(|row| TaskReport {
                id: row.id,
                correlation_id: row.correlation_id,
                status: row.status,
                created_at: row.created_at,
                work_items: u32::try_from(
                    state
                        .work_items
                        .iter()
                        .filter(|w| w.item.task_id == row.id)
                        .count(),
                )
                .unwrap_or(u32::MAX),
                results: state
                    .results
                    .iter()
                    .filter(|r| r.task_id == row.id)
                    .cloned()
                    .collect(),
            }))
        })
    }

    fn delete_task(&self, task: TaskRef) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let Some(task_id) = state.find_task(task).map(|row| row.id) else {
                return Ok(false);
            };
            state.tasks.retain(|row| row.id != task_id);
            state.work_items.retain(|row| row.item.task_id != task_id);
            state.results.retain(|row| row.task_id != task_id);
            Ok(true)
        })
    }

    fn lease_next_work_item<'a>(
        &'a self,
        _worker: &'a str,
        lease: Duration,
    ) -> StoreFuture<'a, Option<WorkItem>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let now = Utc::now();
            let settled: Vec<WorkItemId> = state.results.iter().map(|r| r.work_item_id).collect();
            let open_tasks: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|row| row.status == TaskStatus::Pending)
                .map(|row| row.id)
                .collect();
            let lease = chrono::Duration::from_std(lease)
                .map_err(|e| HarvestError::InvalidInput(format!("lease out of range: {e}")))?;

            Ok(state
                .work_items
                .iter_mut()
                .find(|row| {
                    !settled.contains(&row.item.id)
                        && open_tasks.contains(&row.item.task_id)
                        && row.leased_until.map_or(true, |until| until <= now)
                })
                .map(|row| {
                    row.leased_until = Some(now + lease);
                    row.item.clone()
                }))
        })
    }

    fn release_expired_leases(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let now = Utc::now();
            let released = state
                .work_items
                .iter_mut()
                .filter(|row| row.leased_until.is_some_and(|until| until <= now))
                .map(|row| row.leased_until = None)
                .count();
            Ok(u32::try_from(released).unwrap_or(u32::MAX))
        })
    }
}

impl ResultStore for MemoryStore {
    fn insert_result<'a>(
        &'a self,
        task_id: TaskId,
        work_item_id: WorkItemId,
        outcome: &'a WorkItemOutcome,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            if state.has_result(work_item_id) {
                return Ok(false);
            }
            let Some(locator) = state
                .work_items
                .iter()
                .find(|row| row.item.id == work_item_id && row.item.task_id == task_id)
                .map(|row| row.item.locator.clone())
            else {
                return Ok(false);
            };
            let sequence = state.next_id();
            state.results.push(StoredResult {
                sequence,
                task_id,
                work_item_id,
                locator,
                outcome: outcome.clone(),
                recorded_at: Utc::now(),
            });
            Ok(true)
        })
    }

    fn complete_task_if_settled(&self, task_id: TaskId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let settled = state
                .work_items
                .iter()
                .filter(|row| row.item.task_id == task_id)
                .all(|row| state.has_result(row.item.id));
            Ok(settled
                && state
                    .tasks
                    .iter_mut()
                    .find(|row| row.id == task_id && row.status == TaskStatus::Pending)
                    .map(|row| row.status = TaskStatus::Done)
                    .is_some())
        })
    }

    fn complete_settled_tasks(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            let settled: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|row| row.status == TaskStatus::Pending)
                .filter(|row| {
                    state
                        .work_items
                        .iter()
                        .filter(|w| w.item.task_id == row.id)
                        .all(|w| state.has_result(w.item.id))
                })
                .map(|row| row.id)
                .collect();
            let flipped = state
                .tasks
                .iter_mut()
                .filter(|row| settled.contains(&row.id))
                .map(|row| row.status = TaskStatus::Done)
                .count();
            Ok(u32::try_from(flipped).unwrap_or(u32::MAX))
        })
    }

    fn fail_task(&self, task_id: TaskId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.check_available()?;
            Ok(state
                .tasks
                .iter_mut()
                .find(|row| row.id == task_id && row.status == TaskStatus::Pending)
                .map(|row| row.status = TaskStatus::Error)
                .is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::{CredentialStore, ResultStore, TaskStore};
    use crate::types::{
        CredentialHealth, EgressKind, FailureReason, NewTask, SortOrder, TaskRef, TaskStatus,
        WorkItemOutcome,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn when_egress_is_already_bound_then_assignment_does_not_write() {
        let store = MemoryStore::new();
        let egress = store.register_egress("10.0.0.1", 3128, EgressKind::Http).await;
        let credential = store.register_credential("+100").await;

        let first = store.assign_egress(&credential).await.ok().flatten();
        let second = store.assign_egress(&credential).await.ok().flatten();

        assert_eq!(first.map(|e| e.id), Some(egress.id));
        assert_eq!(second.map(|e| e.id), Some(egress.id));
        assert_eq!(store.egress_binding_writes().await, 1);
    }

    #[tokio::test]
    async fn when_no_egress_exists_then_credential_stays_unbound() {
        let store = MemoryStore::new();
        let credential = store.register_credential("+100").await;
        assert!(matches!(store.assign_egress(&credential).await, Ok(None)));
        assert_eq!(store.egress_binding_writes().await, 0);
    }

    #[tokio::test]
    async fn when_banned_then_health_transition_to_active_is_refused() {
        let store = MemoryStore::new();
        let credential = store.register_credential("+100").await;
        store.set_health(credential.id, CredentialHealth::Banned).await;

        let moved = store
            .transition_health(credential.id, CredentialHealth::Active)
            .await;
        assert!(matches!(moved, Ok(false)));

        let reset = store.reset_health("+100").await.ok().flatten();
        assert_eq!(reset.map(|c| c.health), Some(CredentialHealth::Active));
    }

    #[tokio::test]
    async fn when_item_is_leased_then_it_is_not_handed_out_twice() {
        let store = MemoryStore::new();
        let task = NewTask::uniform(&["https://t.me/a/1".to_string()], 10, SortOrder::Asc);
        store.submit_task(&task).await.ok();

        let first = store
            .lease_next_work_item("w1", Duration::from_secs(60))
            .await
            .ok()
            .flatten();
        let second = store
            .lease_next_work_item("w2", Duration::from_secs(60))
            .await
            .ok()
            .flatten();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn when_result_already_exists_then_second_insert_is_a_no_op() {
        let store = MemoryStore::new();
        let task = NewTask::uniform(&["https://t.me/a/1".to_string()], 10, SortOrder::Asc);
        let handle = store
            .submit_task(&task)
            .await
            .unwrap_or_else(|e| unreachable!("submit failed: {e}"));
        let items = store.work_items(handle.id).await;
        let outcome = WorkItemOutcome::failure(FailureReason::NotFound, "gone");

        let first = store.insert_result(handle.id, items[0].id, &outcome).await;
        let second = store.insert_result(handle.id, items[0].id, &outcome).await;

        assert!(matches!(first, Ok(true)));
        assert!(matches!(second, Ok(false)));
        assert!(matches!(
            store.complete_task_if_settled(handle.id).await,
            Ok(true)
        ));

        let report = store
            .task_report(TaskRef::Id(handle.id))
            .await
            .ok()
            .flatten();
        assert_eq!(report.as_ref().map(|r| r.status), Some(TaskStatus::Done));
        assert_eq!(report.map(|r| r.results.len()), Some(1));
    }

    #[tokio::test]
    async fn when_unavailable_then_every_call_is_a_store_failure() {
        let store = MemoryStore::new();
        store.set_unavailable(true).await;
        let err = store.active_credential_count().await.err();
        assert!(err.is_some_and(|e| e.is_store_failure()));
    }
}
