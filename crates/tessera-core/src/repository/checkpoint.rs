//! Checkpoint repository trait definition.
//!
//! The repository stores raw checkpoint documents (one per unit of a run) and
//! the run leases. It deliberately deals in `serde_json::Value` so that the
//! checkpoint manager can validate documents structurally before trusting
//! them as typed logs.

use std::time::Duration;

use serde_json::Value;
use tessera_types::error::RepositoryError;
use tessera_types::execution::Lease;
use uuid::Uuid;

/// Repository trait for checkpoint persistence.
///
/// Covers two entity families:
/// - **Documents:** one checkpoint document per `(execution_id, unit_id)`,
///   overwritten on every persist.
/// - **Leases:** exclusive ownership of an execution id.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Insert or replace the document for one unit of a run.
    fn save_document(
        &self,
        execution_id: &Uuid,
        unit_id: &str,
        document: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Every unit document of a run, ordered by unit id. Empty if unknown.
    fn load_documents(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Value>, RepositoryError>> + Send;

    /// Ids of every run with at least one stored document.
    fn list_executions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Delete every document of a run. Returns `true` if any existed.
    fn delete_execution(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Acquire the lease on a run for `owner`.
    ///
    /// Re-acquiring an own lease refreshes it. A lease held by another owner
    /// fails with `RepositoryError::Conflict` unless it is older than `ttl`,
    /// in which case it is taken over and `previous_owner` is set.
    fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<Lease, RepositoryError>> + Send;

    /// Release a lease held by `owner`. Returns `false` if `owner` did not
    /// hold it.
    fn release_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
