//! JSON file checkpoint store.
//!
//! Layout under the store root:
//!
//! ```text
//! {root}/{execution_id}/{unit_id}.json   one document per unit
//! {root}/.leases/{execution_id}.lock     run lease
//! ```
//!
//! Documents are written to a temp file in the same directory and renamed
//! into place, so a crash never leaves a half-written checkpoint. Lease files
//! are created with `create_new`, which fails if another engine holds one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tessera_core::repository::checkpoint::CheckpointRepository;
use tessera_types::error::RepositoryError;
use tessera_types::execution::Lease;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const LEASE_DIR: &str = ".leases";

/// Single-node checkpoint store: one JSON file per unit log.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    root: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, execution_id: &Uuid) -> PathBuf {
        self.root.join(execution_id.to_string())
    }

    /// Path of one unit document.
    pub fn document_path(&self, execution_id: &Uuid, unit_id: &str) -> PathBuf {
        self.run_dir(execution_id)
            .join(format!("{}.json", encode_file_stem(unit_id)))
    }

    pub fn lease_path(&self, execution_id: &Uuid) -> PathBuf {
        self.root.join(LEASE_DIR).join(format!("{execution_id}.lock"))
    }

    async fn read_lease(&self, path: &Path) -> Result<Option<Lease>, RepositoryError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<Lease>(&bytes) {
                Ok(lease) => Ok(Some(lease)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable lease file, treating as stale");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a unit id onto a safe file stem. Characters outside
/// `[A-Za-z0-9_.-]` are percent-encoded, so distinct ids stay distinct.
fn encode_file_stem(unit_id: &str) -> String {
    let mut out = String::with_capacity(unit_id.len());
    for byte in unit_id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            b'.' if !out.is_empty() => out.push('.'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Write `bytes` to `path` via a sibling temp file and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RepositoryError::Io(format!("invalid checkpoint path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn to_json_bytes<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec_pretty(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

// ---------------------------------------------------------------------------
// CheckpointRepository impl
// ---------------------------------------------------------------------------

impl CheckpointRepository for JsonFileCheckpointStore {
    async fn save_document(
        &self,
        execution_id: &Uuid,
        unit_id: &str,
        document: &Value,
    ) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(self.run_dir(execution_id)).await?;
        let bytes = to_json_bytes(document)?;
        write_atomic(&self.document_path(execution_id, unit_id), &bytes).await
    }

    async fn load_documents(&self, execution_id: &Uuid) -> Result<Vec<Value>, RepositoryError> {
        let dir = self.run_dir(execution_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_document {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let document: Value = serde_json::from_slice(&bytes).map_err(|e| {
                RepositoryError::Query(format!("corrupt checkpoint file {}: {e}", path.display()))
            })?;
            let key = document
                .get("unitId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());
            documents.push((key, document));
        }

        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn list_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<Uuid>().ok())
            else {
                continue;
            };
            let mut files = tokio::fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if file.path().extension().is_some_and(|ext| ext == "json") {
                    ids.push(id);
                    break;
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        match tokio::fs::remove_dir_all(self.run_dir(execution_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, RepositoryError> {
        let path = self.lease_path(execution_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut lease = Lease::new(*execution_id, owner);
        let bytes = to_json_bytes(&lease)?;

        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match created {
            Ok(mut file) => {
                file.write_all(&bytes).await?;
                file.sync_all().await?;
                return Ok(lease);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(current) = self.read_lease(&path).await? {
            if current.owner != owner {
                if !current.is_stale(ttl, Utc::now()) {
                    return Err(RepositoryError::Conflict(format!(
                        "execution {execution_id} is leased by {}",
                        current.owner
                    )));
                }
                lease.previous_owner = Some(current.owner);
            }
        }

        write_atomic(&path, &to_json_bytes(&lease)?).await?;
        Ok(lease)
    }

    async fn release_lease(&self, execution_id: &Uuid, owner: &str) -> Result<bool, RepositoryError> {
        let path = self.lease_path(execution_id);
        match self.read_lease(&path).await? {
            Some(current) if current.owner == owner => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
