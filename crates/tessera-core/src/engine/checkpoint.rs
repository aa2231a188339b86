//! Durable checkpoint manager for execution logs.
//!
//! Wraps `CheckpointRepository` to provide a higher-level API: every log is
//! sanitized, verified free of secrets, structurally validated, stamped with
//! a version, and only then handed to the repository. Loading validates the
//! raw documents before deserializing them, so corrupt state is rejected
//! with specific errors instead of being silently discarded.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use dashmap::DashMap;
use serde_json::{Value, json};
use tessera_types::error::RepositoryError;
use tessera_types::execution::{
    Checkpoint, CheckpointSummary, ExecutionLog, ExecutionStatus, Lease, ResumeDecision,
    ValidationReport,
};
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointRepository;
use crate::security::sanitizer::SecretSanitizer;

const KNOWN_STATUSES: &[&str] = &["pending", "running", "completed", "failed", "rolled_back"];

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable checkpoints for execution runs.
///
/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (JSON files, SQLite, in-memory). The executor persists through the
/// manager after every step, before moving forward.
pub struct CheckpointManager<R: CheckpointRepository> {
    repo: R,
    sanitizer: Arc<SecretSanitizer>,
    /// Last persisted version per `(execution_id, unit_id)`.
    versions: DashMap<(Uuid, String), u64>,
}

impl<R: CheckpointRepository> CheckpointManager<R> {
    pub fn new(repo: R, sanitizer: Arc<SecretSanitizer>) -> Self {
        Self {
            repo,
            sanitizer,
            versions: DashMap::new(),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn sanitizer(&self) -> &Arc<SecretSanitizer> {
        &self.sanitizer
    }

    // -----------------------------------------------------------------------
    // Persist / load
    // -----------------------------------------------------------------------

    /// Persist a unit's execution log, overwriting the previous checkpoint.
    ///
    /// Step outputs, step errors and postcondition messages are sanitized
    /// first; identity fields (ids, timestamps, status) are stored verbatim
    /// so the document always matches its repository key. If the sanitized
    /// payload still leaks a secret value the write is refused with
    /// `CheckpointError::SecretLeak`.
    pub async fn save(&self, log: &ExecutionLog) -> Result<Checkpoint, CheckpointError> {
        let clean = self.scrub(log);

        let key = (log.execution_id, log.unit_id.clone());
        let version = self.versions.get(&key).map(|v| *v).unwrap_or(0) + 1;
        let checkpoint = Checkpoint::new(clean, version);
        let document = serde_json::to_value(&checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let findings = self.sanitizer.validate_no_secrets(&payload(&checkpoint.log));
        let leaks: Vec<String> = findings
            .iter()
            .filter(|f| f.is_value_leak())
            .map(|f| f.path().to_string())
            .collect();
        if !leaks.is_empty() {
            tracing::warn!(
                execution_id = %log.execution_id,
                unit_id = %log.unit_id,
                paths = ?leaks,
                "refusing to persist checkpoint containing secrets"
            );
            return Err(CheckpointError::SecretLeak { paths: leaks });
        }
        for finding in findings.iter().filter(|f| !f.is_value_leak()) {
            tracing::debug!(
                execution_id = %log.execution_id,
                %finding,
                "suspicious key in checkpoint (value redacted)"
            );
        }

        let report = Self::validate_document(&document);
        if !report.is_valid() {
            return Err(CheckpointError::Invalid {
                errors: report.errors,
            });
        }

        self.repo
            .save_document(&log.execution_id, &log.unit_id, &document)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        self.versions.insert(key, version);

        tracing::debug!(
            execution_id = %log.execution_id,
            unit_id = %log.unit_id,
            status = %log.status,
            steps = log.steps.len(),
            version,
            "checkpoint persisted"
        );

        Ok(checkpoint)
    }

    /// Copy of `log` with every payload field passed through the sanitizer.
    fn scrub(&self, log: &ExecutionLog) -> ExecutionLog {
        let mut clean = log.clone();
        for step in &mut clean.steps {
            step.output = step.output.as_ref().map(|v| self.sanitizer.sanitize_value(v));
            step.error = step.error.as_deref().map(|e| self.sanitizer.sanitize(e));
        }
        for result in clean.postcondition_results.iter_mut().flatten() {
            result.message = self.sanitizer.sanitize(&result.message);
        }
        clean
    }

    /// Load every unit checkpoint of a run.
    ///
    /// Fails with `NotFound` when the run has no checkpoints, and with
    /// `Invalid` (carrying every validation error, prefixed by unit) when any
    /// document is structurally broken.
    pub async fn load(&self, execution_id: &Uuid) -> Result<Vec<Checkpoint>, CheckpointError> {
        let documents = self
            .repo
            .load_documents(execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        if documents.is_empty() {
            return Err(CheckpointError::NotFound(*execution_id));
        }

        let mut errors = Vec::new();
        let mut checkpoints = Vec::with_capacity(documents.len());
        for (i, document) in documents.iter().enumerate() {
            let label = document
                .get("unitId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{i}"));

            let report = Self::validate_document(document);
            for warning in &report.warnings {
                tracing::warn!(execution_id = %execution_id, unit_id = %label, warning = %warning, "checkpoint validation warning");
            }
            if !report.is_valid() {
                errors.extend(report.errors.iter().map(|e| format!("{label}: {e}")));
                continue;
            }

            match serde_json::from_value::<Checkpoint>(document.clone()) {
                Ok(cp) if cp.log.execution_id != *execution_id => errors.push(format!(
                    "{label}: document belongs to execution {}",
                    cp.log.execution_id
                )),
                Ok(cp) => checkpoints.push(cp),
                Err(e) => errors.push(format!("{label}: {e}")),
            }
        }

        if !errors.is_empty() {
            return Err(CheckpointError::Invalid { errors });
        }

        for cp in &checkpoints {
            self.versions
                .insert((cp.log.execution_id, cp.log.unit_id.clone()), cp.version);
        }
        Ok(checkpoints)
    }

    /// Load a run's logs without the checkpoint metadata.
    pub async fn load_logs(&self, execution_id: &Uuid) -> Result<Vec<ExecutionLog>, CheckpointError> {
        Ok(self
            .load(execution_id)
            .await?
            .into_iter()
            .map(|cp| cp.log)
            .collect())
    }

    /// Summaries of every stored checkpoint. Unreadable documents are skipped
    /// with a warning so one corrupt run does not hide the others.
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let ids = self
            .repo
            .list_executions()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        let mut summaries = Vec::new();
        for id in ids {
            let documents = self
                .repo
                .load_documents(&id)
                .await
                .map_err(|e| CheckpointError::Repository(e.to_string()))?;
            for document in documents {
                match serde_json::from_value::<Checkpoint>(document) {
                    Ok(cp) => summaries.push(CheckpointSummary::from(&cp)),
                    Err(e) => {
                        tracing::warn!(execution_id = %id, error = %e, "skipping unreadable checkpoint")
                    }
                }
            }
        }
        Ok(summaries)
    }

    /// Delete every checkpoint of a run. Returns `true` if any existed.
    pub async fn delete(&self, execution_id: &Uuid) -> Result<bool, CheckpointError> {
        let existed = self
            .repo
            .delete_execution(execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        self.versions.retain(|(id, _), _| id != execution_id);
        tracing::debug!(execution_id = %execution_id, existed, "checkpoints deleted");
        Ok(existed)
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    pub async fn acquire_lease(
        &self,
        execution_id: &Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<Lease, CheckpointError> {
        let lease = self
            .repo
            .acquire_lease(execution_id, owner, ttl)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(detail) => CheckpointError::LeaseHeld {
                    execution_id: *execution_id,
                    detail,
                },
                other => CheckpointError::Repository(other.to_string()),
            })?;
        if let Some(previous) = &lease.previous_owner {
            tracing::warn!(
                execution_id = %execution_id,
                owner,
                previous_owner = %previous,
                "took over stale lease"
            );
        }
        Ok(lease)
    }

    pub async fn release_lease(&self, execution_id: &Uuid, owner: &str) -> Result<bool, CheckpointError> {
        self.repo
            .release_lease(execution_id, owner)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate a typed log.
    pub fn validate(log: &ExecutionLog) -> ValidationReport {
        match serde_json::to_value(log) {
            Ok(document) => Self::validate_document(&document),
            Err(e) => {
                let mut report = ValidationReport::default();
                report.error(format!("log is not serializable: {e}"));
                report
            }
        }
    }

    /// Structurally validate a raw checkpoint (or log) document.
    ///
    /// Missing or mistyped fields are reported, never panicked on.
    pub fn validate_document(document: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();
        let Some(obj) = document.as_object() else {
            report.error("checkpoint document must be a JSON object");
            return report;
        };

        match obj.get("executionId") {
            None | Some(Value::Null) => report.error("missing executionId"),
            Some(Value::String(s)) if Uuid::parse_str(s).is_ok() => {}
            Some(_) => report.error("executionId is not a valid UUID"),
        }

        match obj.get("unitId") {
            None | Some(Value::Null) => report.error("missing unitId"),
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(_) => report.error("unitId must be a non-empty string"),
        }

        match obj.get("startedAt") {
            None | Some(Value::Null) => report.error("missing startedAt"),
            Some(Value::String(s)) if DateTime::parse_from_rfc3339(s).is_ok() => {}
            Some(_) => report.error("startedAt is not an RFC 3339 timestamp"),
        }

        let status = match obj.get("status") {
            None | Some(Value::Null) => {
                report.error("missing status");
                None
            }
            Some(Value::String(s)) if KNOWN_STATUSES.contains(&s.as_str()) => Some(s.as_str()),
            Some(other) => {
                report.error(format!("unknown status {other}"));
                None
            }
        };

        let has_completed_at = obj.get("completedAt").is_some_and(|v| !v.is_null());
        match status {
            Some("completed") if !has_completed_at => {
                report.error("status is completed but completedAt is missing")
            }
            Some("running") if has_completed_at => {
                report.warn("status is running but completedAt is set")
            }
            _ => {}
        }

        match obj.get("steps") {
            Some(Value::Array(steps)) => Self::validate_steps(steps, &mut report),
            None | Some(Value::Null) => report.error("missing steps"),
            Some(_) => report.error("steps must be an array"),
        }

        if let Some(results) = obj.get("postconditionResults") {
            if !results.is_null() && !results.is_array() {
                report.error("postconditionResults must be an array");
            }
        }

        report
    }

    fn validate_steps(steps: &[Value], report: &mut ValidationReport) {
        let last = steps.len().saturating_sub(1);
        let mut seen = BTreeSet::new();
        for (position, step) in steps.iter().enumerate() {
            let Some(step) = step.as_object() else {
                report.error(format!("step {position} is not an object"));
                continue;
            };
            match step.get("stepIndex").and_then(Value::as_u64) {
                Some(index) if index == position as u64 => {
                    seen.insert(index);
                }
                Some(index) => report.error(format!(
                    "step {position} records index {index}, expected {position}"
                )),
                None => report.error(format!("step {position} has no numeric stepIndex")),
            }
            if !step.get("success").is_some_and(Value::is_boolean) {
                report.error(format!("step {position} has no boolean success flag"));
            }
            let completed = step.get("completedAt").is_some_and(|v| !v.is_null());
            if !completed && position < last {
                report.warn(format!(
                    "step {position} has no completedAt (possibly an in-flight retry at crash time)"
                ));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Resume decisions
    // -----------------------------------------------------------------------

    /// Whether a single unit log can be resumed, and from which step.
    pub fn can_resume(log: &ExecutionLog) -> ResumeDecision {
        match log.status {
            ExecutionStatus::Completed => ResumeDecision::blocked("already completed"),
            ExecutionStatus::RolledBack => ResumeDecision::blocked("already rolled back"),
            _ => ResumeDecision::resumable(log.resume_index()),
        }
    }

    /// Resume decision for a whole run.
    ///
    /// Blocked once any unit is rolled back (rollback always covers the whole
    /// run) or when every unit is final. Otherwise resumable from the resume
    /// point of the first unit that has not completed; units that never
    /// started carry `pending` logs and resume from step 0.
    pub fn can_resume_run(logs: &[ExecutionLog]) -> ResumeDecision {
        if logs.iter().any(|l| l.status == ExecutionStatus::RolledBack) {
            return ResumeDecision::blocked("already rolled back");
        }
        if !logs.is_empty() && logs.iter().all(|l| l.status.is_final()) {
            return ResumeDecision::blocked("already completed");
        }
        let from = logs
            .iter()
            .find(|l| !l.status.is_final())
            .map(ExecutionLog::resume_index)
            .unwrap_or(0);
        ResumeDecision::resumable(from)
    }
}

/// The free-form fields of a log, laid out at the same paths as in the
/// checkpoint document so leak findings point at real locations.
fn payload(log: &ExecutionLog) -> Value {
    let steps: Vec<Value> = log
        .steps
        .iter()
        .map(|s| json!({ "output": s.output, "error": s.error }))
        .collect();
    let messages: Vec<Value> = log
        .postcondition_results
        .iter()
        .flatten()
        .map(|r| json!({ "message": r.message }))
        .collect();
    json!({ "steps": steps, "postconditionResults": messages })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("invalid checkpoint: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },

    #[error("no checkpoint found for execution {0}")]
    NotFound(Uuid),

    #[error("execution {execution_id} is leased by another engine: {detail}")]
    LeaseHeld { execution_id: Uuid, detail: String },

    #[error("checkpoint would leak secrets at {}", paths.join(", "))]
    SecretLeak { paths: Vec<String> },

    #[error("checkpoint serialization error: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tessera_types::execution::{PostconditionResult, StepResult};

    use super::*;
    use crate::repository::memory::MemoryCheckpointStore;

    fn manager() -> CheckpointManager<MemoryCheckpointStore> {
        CheckpointManager::new(MemoryCheckpointStore::new(), Arc::new(SecretSanitizer::default()))
    }

    fn step(success: bool) -> StepResult {
        StepResult {
            step_index: 0,
            success,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            duration_ms: 3,
            retry_attempts: 0,
            output: Some(json!({"ok": success})),
            error: (!success).then(|| "boom".to_string()),
            skipped: false,
        }
    }

    fn failed_at_two() -> ExecutionLog {
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        log.append_step(step(true));
        log.append_step(step(true));
        log.append_step(step(false));
        log.finalize(ExecutionStatus::Failed);
        log
    }

    // -------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let mgr = manager();
        let log = failed_at_two();
        mgr.save(&log).await.unwrap();

        let loaded = mgr.load_logs(&log.execution_id).await.unwrap();
        assert_eq!(loaded, vec![log]);
    }

    #[tokio::test]
    async fn test_version_increments_on_overwrite() {
        let mgr = manager();
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        assert_eq!(mgr.save(&log).await.unwrap().version, 1);
        log.append_step(step(true));
        assert_eq!(mgr.save(&log).await.unwrap().version, 2);

        // A fresh manager continues the sequence after loading.
        let other = CheckpointManager::new(mgr.repo().clone(), Arc::new(SecretSanitizer::default()));
        other.load(&log.execution_id).await.unwrap();
        assert_eq!(other.save(&log).await.unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_load_unknown_is_not_found() {
        let err = manager().load(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_document() {
        let mgr = manager();
        let id = Uuid::now_v7();
        mgr.repo()
            .save_document(&id, "api", &json!({"executionId": id.to_string(), "steps": "nope"}))
            .await
            .unwrap();

        match mgr.load(&id).await.unwrap_err() {
            CheckpointError::Invalid { errors } => {
                assert!(errors.iter().any(|e| e.contains("missing unitId")));
                assert!(errors.iter().any(|e| e.contains("steps must be an array")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_sanitizes_registered_secret() {
        let mgr = manager();
        mgr.sanitizer().register("sk_live_abc123");
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        let mut result = step(false);
        result.error = Some("401 for key sk_live_abc123".to_string());
        log.append_step(result);

        let cp = mgr.save(&log).await.unwrap();
        assert_eq!(cp.log.steps[0].error.as_deref(), Some("401 for key [REDACTED]"));

        let raw = mgr.repo().load_documents(&log.execution_id).await.unwrap();
        assert!(!raw[0].to_string().contains("sk_live_abc123"));
    }

    #[tokio::test]
    async fn test_identity_fields_survive_overlapping_secret() {
        let mgr = manager();
        mgr.sanitizer().register("staging");
        let mut log = ExecutionLog::start(Uuid::now_v7(), "deploy-staging");
        let mut result = step(true);
        result.output = Some(json!({"target": "staging cluster"}));
        log.append_step(result);
        let mut failed = step(false);
        failed.error = Some("staging rejected the rollout".to_string());
        log.append_step(failed);
        log.postcondition_results = Some(vec![PostconditionResult {
            postcondition_id: "healthy".to_string(),
            passed: false,
            message: "staging unhealthy".to_string(),
            checked_at: Utc::now(),
        }]);

        let cp = mgr.save(&log).await.unwrap();
        assert_eq!(cp.log.unit_id, "deploy-staging");
        assert_eq!(cp.log.steps[0].output, Some(json!({"target": "[REDACTED] cluster"})));
        assert_eq!(cp.log.steps[1].error.as_deref(), Some("[REDACTED] rejected the rollout"));
        let message = &cp.log.postcondition_results.as_ref().unwrap()[0].message;
        assert_eq!(message, "[REDACTED] unhealthy");

        let loaded = mgr.load_logs(&log.execution_id).await.unwrap();
        assert_eq!(loaded, vec![cp.log]);
        assert_eq!(loaded[0].unit_id, log.unit_id);
        assert_eq!(loaded[0].started_at, log.started_at);
    }

    #[tokio::test]
    async fn test_secret_leak_blocks_write() {
        let mgr = manager();
        // The marker itself contains this literal, so redaction cannot help.
        mgr.sanitizer().register("REDACTED");
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        let mut result = step(true);
        result.output = Some(json!("REDACTED"));
        log.append_step(result);

        let err = mgr.save(&log).await.unwrap_err();
        assert!(matches!(err, CheckpointError::SecretLeak { .. }));
        assert!(mgr.repo().load_documents(&log.execution_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let mgr = manager();
        let log = failed_at_two();
        mgr.save(&log).await.unwrap();

        let summaries = mgr.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].step_count, 3);
        assert_eq!(summaries[0].status, ExecutionStatus::Failed);

        assert!(mgr.delete(&log.execution_id).await.unwrap());
        assert!(mgr.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lease_held_maps_to_checkpoint_error() {
        let mgr = manager();
        let id = Uuid::now_v7();
        let ttl = Duration::from_secs(60);
        mgr.acquire_lease(&id, "a", ttl).await.unwrap();
        let err = mgr.acquire_lease(&id, "b", ttl).await.unwrap_err();
        assert!(matches!(err, CheckpointError::LeaseHeld { .. }));
        assert!(mgr.release_lease(&id, "a").await.unwrap());
    }

    // -------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------

    #[test]
    fn test_valid_log_has_no_errors() {
        let report = CheckpointManager::<MemoryCheckpointStore>::validate(&failed_at_two());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_index_mismatch_is_error() {
        let mut log = failed_at_two();
        log.steps[1].step_index = 7;
        let report = CheckpointManager::<MemoryCheckpointStore>::validate(&log);
        assert_eq!(report.errors, vec!["step 1 records index 7, expected 1".to_string()]);
    }

    #[test]
    fn test_completed_without_timestamp_is_error() {
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        log.status = ExecutionStatus::Completed;
        let report = CheckpointManager::<MemoryCheckpointStore>::validate(&log);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_running_with_timestamp_and_open_step_are_warnings() {
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        let mut open = step(false);
        open.completed_at = None;
        log.append_step(open);
        log.append_step(step(true));
        log.completed_at = Some(Utc::now());

        let report = CheckpointManager::<MemoryCheckpointStore>::validate(&log);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_non_object_document() {
        let report = CheckpointManager::<MemoryCheckpointStore>::validate_document(&json!([1, 2]));
        assert!(!report.is_valid());
    }

    // -------------------------------------------------------------------
    // Resume decisions
    // -------------------------------------------------------------------

    #[test]
    fn test_can_resume_failed_log() {
        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume(&failed_at_two());
        assert_eq!(decision, ResumeDecision::resumable(2));
    }

    #[test]
    fn test_cannot_resume_final_logs() {
        let mut log = failed_at_two();
        log.status = ExecutionStatus::Completed;
        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume(&log);
        assert!(!decision.can_resume);
        assert_eq!(decision.reason.as_deref(), Some("already completed"));

        log.status = ExecutionStatus::RolledBack;
        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume_run(&[log]);
        assert_eq!(decision.reason.as_deref(), Some("already rolled back"));
    }

    #[test]
    fn test_mixed_final_logs_are_not_resumable() {
        let mut done = ExecutionLog::start(Uuid::now_v7(), "a");
        done.finalize(ExecutionStatus::Completed);
        let mut undone = ExecutionLog::start(done.execution_id, "b");
        undone.finalize(ExecutionStatus::RolledBack);

        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume_run(&[done, undone]);
        assert!(!decision.can_resume);
        assert_eq!(decision.reason.as_deref(), Some("already rolled back"));
    }

    #[test]
    fn test_pending_unit_keeps_run_resumable() {
        let mut done = ExecutionLog::start(Uuid::now_v7(), "a");
        done.append_step(step(true));
        done.finalize(ExecutionStatus::Completed);
        let waiting = ExecutionLog::pending(done.execution_id, "b");

        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume_run(&[done, waiting]);
        assert_eq!(decision, ResumeDecision::resumable(0));
    }

    #[test]
    fn test_all_succeeded_but_not_finalized_resumes_at_end() {
        let mut log = ExecutionLog::start(Uuid::now_v7(), "api");
        log.append_step(step(true));
        log.append_step(step(true));
        let decision = CheckpointManager::<MemoryCheckpointStore>::can_resume(&log);
        assert_eq!(decision.resume_from_step, Some(2));
    }
}
