use super::rows::{
    credential_from_row, egress_from_row, CredentialRow, EgressRow, CREDENTIAL_COLUMNS,
    EGRESS_COLUMNS,
};
use super::HarvestDb;
use crate::error::{HarvestError, Result};
use crate::store::{CredentialStore, StoreFuture};
use crate::types::{Credential, CredentialHealth, CredentialId, Egress};
use tracing::debug;

impl HarvestDb {
    async fn bound_egress(&self, credential_id: CredentialId) -> Result<Option<Egress>> {
        sqlx::query_as::<_, EgressRow>(
            "SELECT e.id, e.kind, e.address, e.port, e.username, e.secret
             FROM credentials c
             JOIN egresses e ON e.id = c.egress_id
             WHERE c.id = $1",
        )
        .bind(credential_id.value())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| HarvestError::DatabaseError(format!("Failed to read bound egress: {e}")))?
        .map(egress_from_row)
        .transpose()
    }

    async fn least_bound_egress(&self) -> Result<Option<Egress>> {
        sqlx::query_as::<_, EgressRow>(&format!(
            "SELECT {EGRESS_COLUMNS}
             FROM egresses e
             ORDER BY (SELECT COUNT(*) FROM credentials c WHERE c.egress_id = e.id), e.id
             LIMIT 1"
        ))
        .fetch_optional(self.pool())
        .await
        .map_err(|e| HarvestError::DatabaseError(format!("Failed to rank egresses: {e}")))?
        .map(egress_from_row)
        .transpose()
    }
}

impl CredentialStore for HarvestDb {
    fn active_credential_count(&self) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let count = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM credentials WHERE health = 'active'",
            )
            .fetch_one(self.pool())
            .await
            .map_err(|e| {
                HarvestError::DatabaseError(format!("Failed to count active credentials: {e}"))
            })?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
    }

    fn select_credential<'a>(
        &'a self,
        excluded: &'a [CredentialId],
    ) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            let excluded_ids: Vec<i64> = excluded.iter().map(|id| id.value()).collect();
            sqlx::query_as::<_, CredentialRow>(&format!(
                "SELECT {CREDENTIAL_COLUMNS}
                 FROM credentials
                 WHERE health = 'active' AND NOT (id = ANY($1))
                 ORDER BY usage_count, registered_at, id
                 LIMIT 1"
            ))
            .bind(excluded_ids)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to select credential: {e}")))?
            .map(credential_from_row)
            .transpose()
        })
    }

    fn assign_egress<'a>(&'a self, credential: &'a Credential) -> StoreFuture<'a, Option<Egress>> {
        Box::pin(async move {
            if let Some(bound) = self.bound_egress(credential.id).await? {
                return Ok(Some(bound));
            }
            let Some(chosen) = self.least_bound_egress().await? else {
                return Ok(None);
            };

            let won = sqlx::query(
                "UPDATE credentials SET egress_id = $2 WHERE id = $1 AND egress_id IS NULL",
            )
            .bind(credential.id.value())
            .bind(chosen.id.value())
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to bind egress: {e}")))?;

            if won {
                Ok(Some(chosen))
            } else {
                debug!(credential = %credential.id, "lost egress binding race, re-reading");
                self.bound_egress(credential.id).await
            }
        })
    }

    fn transition_health(
        &self,
        credential_id: CredentialId,
        health: CredentialHealth,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE credentials SET health = $2
                 WHERE id = $1 AND (health <> 'banned' OR $2 = 'banned')",
            )
            .bind(credential_id.value())
            .bind(health.as_str())
            .execute(self.pool())
            .await
            .map(|result| result.rows_affected() > 0)
            .map_err(|e| {
                HarvestError::DatabaseError(format!("Failed to update credential health: {e}"))
            })
        })
    }

    fn record_usage(&self, credential_id: CredentialId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            sqlx::query_scalar::<_, i64>(
                "UPDATE credentials SET usage_count = usage_count + 1
                 WHERE id = $1
                 RETURNING usage_count",
            )
            .bind(credential_id.value())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to record usage: {e}")))?
            .map(|count| u64::try_from(count).unwrap_or(0))
            .ok_or_else(|| HarvestError::CredentialNotFound(credential_id.to_string()))
        })
    }

    fn reset_health<'a>(&'a self, login: &'a str) -> StoreFuture<'a, Option<Credential>> {
        Box::pin(async move {
            sqlx::query_as::<_, CredentialRow>(&format!(
                "UPDATE credentials SET health = 'active'
                 WHERE login = $1
                 RETURNING {CREDENTIAL_COLUMNS}"
            ))
            .bind(login)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to reset health: {e}")))?
            .map(credential_from_row)
            .transpose()
        })
    }
}
