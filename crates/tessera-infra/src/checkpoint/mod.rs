//! Checkpoint store selection.
//!
//! `AnyCheckpointStore` lets the backend be chosen at runtime from
//! `EngineConfig::checkpoint` while the engine stays generic over a single
//! concrete `CheckpointRepository`.

pub mod json_store;

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tessera_core::repository::checkpoint::CheckpointRepository;
use tessera_core::repository::memory::MemoryCheckpointStore;
use tessera_types::config::{CheckpointBackend, CheckpointConfig};
use tessera_types::error::RepositoryError;
use tessera_types::execution::Lease;
use uuid::Uuid;

use crate::config::{ConfigError, resolve_path};
use crate::sqlite::checkpoint::SqliteCheckpointStore;
use crate::sqlite::pool::DatabasePool;

pub use json_store::JsonFileCheckpointStore;

const DEFAULT_JSON_DIR: &str = "checkpoints";
const DEFAULT_SQLITE_FILE: &str = "checkpoints.db";

/// One of the configured checkpoint backends.
#[derive(Clone)]
pub enum AnyCheckpointStore {
    Json(JsonFileCheckpointStore),
    Sqlite(SqliteCheckpointStore),
    Memory(MemoryCheckpointStore),
}

impl AnyCheckpointStore {
    pub fn backend(&self) -> CheckpointBackend {
        match self {
            Self::Json(_) => CheckpointBackend::Json,
            Self::Sqlite(_) => CheckpointBackend::Sqlite,
            Self::Memory(_) => CheckpointBackend::Memory,
        }
    }
}

impl std::fmt::Debug for AnyCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(store) => f.debug_tuple("Json").field(&store.root()).finish(),
            Self::Sqlite(_) => f.write_str("Sqlite"),
            Self::Memory(_) => f.write_str("Memory"),
        }
    }
}

/// Open the store described by `config`, resolving relative paths against
/// `data_dir`.
pub async fn open_checkpoint_store(
    config: &CheckpointConfig,
    data_dir: &Path,
) -> Result<AnyCheckpointStore, ConfigError> {
    let store = match config.backend {
        CheckpointBackend::Json => {
            let root = resolve_path(config.path.as_deref(), data_dir, DEFAULT_JSON_DIR);
            tokio::fs::create_dir_all(&root).await?;
            AnyCheckpointStore::Json(JsonFileCheckpointStore::new(root))
        }
        CheckpointBackend::Sqlite => {
            let path = resolve_path(config.path.as_deref(), data_dir, DEFAULT_SQLITE_FILE);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let pool = DatabasePool::open(&path)
                .await
                .map_err(|e| ConfigError::Database(e.to_string()))?;
            AnyCheckpointStore::Sqlite(SqliteCheckpointStore::new(pool))
        }
        CheckpointBackend::Memory => AnyCheckpointStore::Memory(MemoryCheckpointStore::new()),
    };

    tracing::info!(backend = ?store.backend(), "checkpoint store opened");
    Ok(store)
}

impl CheckpointRepository for AnyCheckpointStore {
    async fn save_document(
        &self,
        execution_id: &Uuid,
        unit_id: &str,
        document: &Value,
    ) -> Result<(), RepositoryError> {
        match self {
            Self::Json(s) => s.save_document(execution_id, unit_id, document).await,
            Self::Sqlite(s) => s.save_document(execution_id, unit_id, document).await,
            Self::Memory(s) => s.save_document(execution_id, unit_id, document).await,
        }
    }

    async fn load_documents(&self, execution_id: &Uuid) -> Result<Vec<Value>, RepositoryError> {
        match self {
            Self::Json(s) => s.load_documents(execution_id).await,
            Self::Sqlite(s) => s.load_documents(execution_id).await,
            Self::Memory(s) => s.load_documents(execution_id).await,
        }
    }

    async fn list_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        match self {
            Self::Json(s) => s.list_executions().await,
            Self::Sqlite(s) => s.list_executions().await,
            Self::Memory(s) => s.list_executions().await,
        }
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        match self {
            Self::Json(s) => s.delete_execution(execution_id).await,
            Self::Sqlite(s) => s.delete_execution(execution_id).await,
            Self::Memory(s) => s.delete_execution(execution_id).await,
        }
    }

    async fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, RepositoryError> {
        match self {
            Self::Json(s) => s.acquire_lease(execution_id, owner, ttl).await,
            Self::Sqlite(s) => s.acquire_lease(execution_id, owner, ttl).await,
            Self::Memory(s) => s.acquire_lease(execution_id, owner, ttl).await,
        }
    }

    async fn release_lease(&self, execution_id: &Uuid, owner: &str) -> Result<bool, RepositoryError> {
        match self {
            Self::Json(s) => s.release_lease(execution_id, owner).await,
            Self::Sqlite(s) => s.release_lease(execution_id, owner).await,
            Self::Memory(s) => s.release_lease(execution_id, owner).await,
        }
    }
}
