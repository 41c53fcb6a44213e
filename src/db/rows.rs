use crate::error::{HarvestError, Result};
use crate::types::{
    Credential, CredentialHealth, CredentialId, Egress, EgressId, EgressKind, SortOrder,
    StoredResult, TaskId, TaskStatus, WorkItem, WorkItemId, WorkItemOutcome,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const CREDENTIAL_COLUMNS: &str = "id, login, health, usage_count, egress_id, registered_at";
pub const EGRESS_COLUMNS: &str = "id, kind, address, port, username, secret";
pub const WORK_ITEM_COLUMNS: &str = "id, task_id, locator, result_limit, sort_order";

pub type CredentialRow = (i64, String, String, i64, Option<i64>, DateTime<Utc>);
pub type EgressRow = (i64, String, String, i32, Option<String>, Option<String>);
pub type TaskRow = (i64, Uuid, String, DateTime<Utc>);
pub type WorkItemRow = (i64, i64, String, i32, String);
pub type ResultRow = (i64, i64, i64, String, String, DateTime<Utc>);

pub fn credential_from_row(row: CredentialRow) -> Result<Credential> {
    let (id, login, health, usage_count, egress_id, registered_at) = row;
    Ok(Credential {
        id: CredentialId::new(id),
        login,
        health: CredentialHealth::try_from(health.as_str()).map_err(HarvestError::DatabaseError)?,
        usage_count: u64::try_from(usage_count).unwrap_or(0),
        egress_id: egress_id.map(EgressId::new),
        registered_at,
    })
}

pub fn egress_from_row(row: EgressRow) -> Result<Egress> {
    let (id, kind, address, port, username, secret) = row;
    Ok(Egress {
        id: EgressId::new(id),
        kind: EgressKind::try_from(kind.as_str()).map_err(HarvestError::DatabaseError)?,
        address,
        port: u16::try_from(port)
            .map_err(|e| HarvestError::DatabaseError(format!("Invalid egress port {port}: {e}")))?,
        username,
        secret,
    })
}

pub fn task_status_from_row(status: &str) -> Result<TaskStatus> {
    TaskStatus::try_from(status).map_err(HarvestError::DatabaseError)
}

pub fn work_item_from_row(row: WorkItemRow) -> Result<WorkItem> {
    let (id, task_id, locator, limit, order) = row;
    Ok(WorkItem {
        id: WorkItemId::new(id),
        task_id: TaskId::new(task_id),
        locator,
        limit: u32::try_from(limit)
            .map_err(|e| HarvestError::DatabaseError(format!("Invalid result limit {limit}: {e}")))?,
        order: SortOrder::try_from(order.as_str()).map_err(HarvestError::DatabaseError)?,
    })
}

pub fn result_from_row(row: ResultRow) -> Result<StoredResult> {
    let (sequence, task_id, work_item_id, locator, payload, recorded_at) = row;
    let outcome: WorkItemOutcome = serde_json::from_str(&payload)?;
    Ok(StoredResult {
        sequence,
        task_id: TaskId::new(task_id),
        work_item_id: WorkItemId::new(work_item_id),
        locator,
        outcome,
        recorded_at,
    })
}

#[cfg(test)]
mod tests {
    use super::{credential_from_row, egress_from_row, result_from_row, work_item_from_row};
    use crate::types::{CredentialHealth, EgressKind, FailureReason, SortOrder};
    use chrono::Utc;

    #[test]
    fn stored_error_health_maps_to_errored() {
        let credential = credential_from_row((
            1,
            "+1".to_string(),
            "error".to_string(),
            3,
            None,
            Utc::now(),
        ));
        assert_eq!(
            credential.ok().map(|c| c.health),
            Some(CredentialHealth::Errored)
        );
    }

    #[test]
    fn unknown_health_is_a_database_error() {
        let credential = credential_from_row((
            1,
            "+1".to_string(),
            "frozen".to_string(),
            0,
            None,
            Utc::now(),
        ));
        assert!(credential.is_err());
    }

    #[test]
    fn egress_port_outside_u16_is_rejected() {
        let row = (1, "socks5".to_string(), "h".to_string(), 70_000, None, None);
        assert!(egress_from_row(row).is_err());
        let row = (1, "socks5".to_string(), "h".to_string(), 1080, None, None);
        assert_eq!(egress_from_row(row).ok().map(|e| e.kind), Some(EgressKind::Socks5));
    }

    #[test]
    fn work_item_row_keeps_order_and_limit() {
        let item = work_item_from_row((5, 2, "https://t.me/a/1".to_string(), 40, "desc".to_string()));
        assert_eq!(
            item.ok().map(|i| (i.limit, i.order)),
            Some((40, SortOrder::Desc))
        );
    }

    #[test]
    fn result_payload_is_parsed_back_into_an_outcome() {
        let row = (
            9,
            2,
            5,
            "https://t.me/a/1".to_string(),
            r#"{"outcome":"failure","reason":"exhausted-pool","detail":"none left"}"#.to_string(),
            Utc::now(),
        );
        assert_eq!(
            result_from_row(row).ok().and_then(|r| r.outcome.failure_reason()),
            Some(FailureReason::ExhaustedPool)
        );
    }
}
