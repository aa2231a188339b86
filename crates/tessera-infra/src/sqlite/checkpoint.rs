//! SQLite checkpoint repository.
//!
//! Documents live in `checkpoints` keyed by `(execution_id, unit_id)`, stored
//! verbatim as JSON text next to a few denormalized columns (status, version,
//! checkpointed_at) for inspection. Leases live in `checkpoint_leases`, whose
//! primary key turns a concurrent second acquisition into a UNIQUE violation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use tessera_core::repository::checkpoint::CheckpointRepository;
use tessera_types::error::RepositoryError;
use tessera_types::execution::Lease;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct LeaseRow {
    owner: String,
    acquired_at: String,
    previous_owner: Option<String>,
}

impl LeaseRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            owner: row.try_get("owner")?,
            acquired_at: row.try_get("acquired_at")?,
            previous_owner: row.try_get("previous_owner")?,
        })
    }

    fn into_lease(self, execution_id: Uuid) -> Result<Lease, RepositoryError> {
        Ok(Lease {
            execution_id,
            owner: self.owner,
            acquired_at: parse_datetime(&self.acquired_at)?,
            previous_owner: self.previous_owner,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn conflict_or_query(e: sqlx::Error, execution_id: &Uuid) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("UNIQUE") {
            return RepositoryError::Conflict(format!(
                "execution {execution_id} was leased concurrently"
            ));
        }
    }
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// CheckpointRepository impl
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointStore {
    async fn save_document(
        &self,
        execution_id: &Uuid,
        unit_id: &str,
        document: &Value,
    ) -> Result<(), RepositoryError> {
        let document_json = serde_json::to_string(document)
            .map_err(|e| RepositoryError::Query(format!("serialize checkpoint: {e}")))?;
        let status = document
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let version = document.get("version").and_then(Value::as_i64).unwrap_or(0);
        let checkpointed_at = document
            .get("checkpointedAt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format_datetime(&Utc::now()));

        sqlx::query(
            r#"INSERT INTO checkpoints (execution_id, unit_id, document, status, version, checkpointed_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, unit_id) DO UPDATE SET
                 document = excluded.document,
                 status = excluded.status,
                 version = excluded.version,
                 checkpointed_at = excluded.checkpointed_at"#,
        )
        .bind(execution_id.to_string())
        .bind(unit_id)
        .bind(&document_json)
        .bind(status)
        .bind(version)
        .bind(&checkpointed_at)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load_documents(&self, execution_id: &Uuid) -> Result<Vec<Value>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT unit_id, document FROM checkpoints WHERE execution_id = ? ORDER BY unit_id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let unit_id: String = row
                .try_get("unit_id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let text: String = row
                .try_get("document")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let document = serde_json::from_str(&text).map_err(|e| {
                RepositoryError::Query(format!("corrupt checkpoint for unit '{unit_id}': {e}"))
            })?;
            documents.push(document);
        }
        Ok(documents)
    }

    async fn list_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query("SELECT DISTINCT execution_id FROM checkpoints ORDER BY execution_id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("execution_id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                parse_uuid(&id)
            })
            .collect()
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let row = sqlx::query(
            "SELECT owner, acquired_at, previous_owner FROM checkpoint_leases WHERE execution_id = ?",
        )
        .bind(execution_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut lease = Lease::new(*execution_id, owner);
        match row {
            None => {
                sqlx::query(
                    "INSERT INTO checkpoint_leases (execution_id, owner, acquired_at, previous_owner) VALUES (?, ?, ?, NULL)",
                )
                .bind(execution_id.to_string())
                .bind(owner)
                .bind(format_datetime(&lease.acquired_at))
                .execute(&mut *tx)
                .await
                .map_err(|e| conflict_or_query(e, execution_id))?;
            }
            Some(row) => {
                let current = LeaseRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_lease(*execution_id)?;
                if current.owner != owner {
                    if !current.is_stale(ttl, Utc::now()) {
                        return Err(RepositoryError::Conflict(format!(
                            "execution {execution_id} is leased by {}",
                            current.owner
                        )));
                    }
                    lease.previous_owner = Some(current.owner.clone());
                }
                let updated = sqlx::query(
                    "UPDATE checkpoint_leases SET owner = ?, acquired_at = ?, previous_owner = ? WHERE execution_id = ? AND owner = ?",
                )
                .bind(owner)
                .bind(format_datetime(&lease.acquired_at))
                .bind(&lease.previous_owner)
                .bind(execution_id.to_string())
                .bind(&current.owner)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
                if updated.rows_affected() == 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "execution {execution_id} was leased concurrently"
                    )));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(lease)
    }

    async fn release_lease(&self, execution_id: &Uuid, owner: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoint_leases WHERE execution_id = ? AND owner = ?")
            .bind(execution_id.to_string())
            .bind(owner)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
