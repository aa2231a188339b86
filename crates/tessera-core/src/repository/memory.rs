//! In-process checkpoint store for tests and embedding.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tessera_types::error::RepositoryError;
use tessera_types::execution::Lease;
use uuid::Uuid;

use super::checkpoint::CheckpointRepository;

/// Checkpoint repository held entirely in memory.
///
/// Clones share the same underlying maps, so a test can keep a handle while
/// the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    documents: Arc<DashMap<Uuid, BTreeMap<String, Value>>>,
    leases: Arc<DashMap<Uuid, Lease>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lease on a run, if any.
    pub fn lease(&self, execution_id: &Uuid) -> Option<Lease> {
        self.leases.get(execution_id).map(|l| l.clone())
    }
}

impl CheckpointRepository for MemoryCheckpointStore {
    async fn save_document(
        &self,
        execution_id: &Uuid,
        unit_id: &str,
        document: &Value,
    ) -> Result<(), RepositoryError> {
        self.documents
            .entry(*execution_id)
            .or_default()
            .insert(unit_id.to_string(), document.clone());
        Ok(())
    }

    async fn load_documents(&self, execution_id: &Uuid) -> Result<Vec<Value>, RepositoryError> {
        Ok(self
            .documents
            .get(execution_id)
            .map(|units| units.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_executions(&self) -> Result<Vec<Uuid>, RepositoryError> {
        let mut ids: Vec<Uuid> = self.documents.iter().map(|e| *e.key()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_execution(&self, execution_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.documents.remove(execution_id).is_some())
    }

    async fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, RepositoryError> {
        let mut lease = Lease::new(*execution_id, owner);
        match self.leases.entry(*execution_id) {
            Entry::Occupied(mut held) => {
                let current = held.get();
                if current.owner != owner {
                    if !current.is_stale(ttl, Utc::now()) {
                        return Err(RepositoryError::Conflict(format!(
                            "execution {execution_id} is leased by {}",
                            current.owner
                        )));
                    }
                    lease.previous_owner = Some(current.owner.clone());
                }
                held.insert(lease.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(lease.clone());
            }
        }
        Ok(lease)
    }

    async fn release_lease(&self, execution_id: &Uuid, owner: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .leases
            .remove_if(execution_id, |_, lease| lease.owner == owner)
            .is_some())
    }
}
