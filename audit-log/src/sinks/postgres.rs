use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use thiserror::Error;

use crate::event::LogEvent;
use crate::sinks::{AuditStore, StoreTransaction};

/// Enumeration of errors for operations against the audit store.
/// Errors originate from sqlx and are wrapped by us to provide the
/// failing command as context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

/// Audit rows stored in the action_logs table in PostgreSQL.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Initialize a new PgEventStore, connecting to PostgreSQL at url.
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool, as sqlx test fixtures hand one over.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let transaction = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Box::new(PgStoreTransaction { transaction }))
    }
}

pub struct PgStoreTransaction {
    transaction: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn persist(&mut self, event: &LogEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO action_logs
    (action, payload, user_id, timestamp)
VALUES
    ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.action)
        .bind(sqlx::types::Json(&event.details))
        .bind(event.user_id)
        .bind(event.timestamp)
        .execute(&mut *self.transaction)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.transaction
            .commit()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "COMMIT".to_owned(),
                error,
            })
    }
}
