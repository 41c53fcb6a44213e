#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Postgres implementation of the store ports.

mod credential_ops;
mod result_ops;
mod rows;
mod snapshot_ops;
mod task_ops;

use crate::error::{HarvestError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

pub const SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct HarvestDb {
    pool: PgPool,
}

impl HarvestDb {
    /// # Errors
    /// Returns an error if the database connection fails.
    pub async fn new(database_url: &str, worker_concurrency: u32) -> Result<Self> {
        let max_connections = resolve_pool_max_connections_from(
            |key| std::env::var(key).ok(),
            worker_concurrency,
        );

        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map(|pool| {
                info!(
                    "Connected to PostgreSQL harvest database ({} connections)",
                    max_connections
                );
                Self { pool }
            })
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to connect to database: {e}")))
    }

    /// Create a new `HarvestDb` with an existing pool (for testing).
    #[must_use]
    pub const fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.initialize_schema_from_sql(SCHEMA_SQL).await
    }

    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn initialize_schema_from_sql(&self, schema_sql: &str) -> Result<()> {
        sqlx::raw_sql(schema_sql)
            .execute(self.pool())
            .await
            .map(|_result| info!("Harvest schema is up to date"))
            .map_err(|e| HarvestError::DatabaseError(format!("Failed to initialize schema: {e}")))
    }
}

fn resolve_pool_max_connections_from<F>(env_lookup: F, worker_concurrency: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup("HARVEST_DB_MAX_CONNECTIONS")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or_else(|| 16_u32.max(worker_concurrency.saturating_mul(3)))
}
