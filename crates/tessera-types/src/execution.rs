//! Execution tracking types: logs, step results, and checkpoint documents.
//!
//! The checkpoint document is the stable on-disk/on-wire shape. Field names
//! are camelCase and optional fields are omitted when absent so that every
//! backing store round-trips the document exactly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a unit's execution log.
///
/// `pending -> running -> {completed | failed | rolled_back}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl ExecutionStatus {
    /// Statuses from which a run can never be resumed.
    pub fn is_final(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step result
// ---------------------------------------------------------------------------

/// Outcome of one step position. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Position of the step in the unit's step list.
    pub step_index: usize,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time across all attempts, including backoff.
    pub duration_ms: u64,
    /// Retries needed (0 = first attempt decided the outcome).
    pub retry_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    /// Whether this step counts as done for resume purposes.
    pub fn is_done(&self) -> bool {
        self.success && self.completed_at.is_some()
    }
}

/// Result of one postcondition evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostconditionResult {
    pub postcondition_id: String,
    pub passed: bool,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

/// Audit log of one unit within one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub execution_id: Uuid,
    pub unit_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Index-ordered, append-only.
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcondition_results: Option<Vec<PostconditionResult>>,
    #[serde(default)]
    pub rollback_executed: bool,
}

impl ExecutionLog {
    /// Start a new log in `running` state.
    pub fn start(execution_id: Uuid, unit_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            unit_id: unit_id.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            postcondition_results: None,
            rollback_executed: false,
        }
    }

    /// A log for a unit that has not started yet. Persisted for every unit
    /// at run start so a crash between stages leaves the run resumable.
    pub fn pending(execution_id: Uuid, unit_id: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Pending,
            ..Self::start(execution_id, unit_id)
        }
    }

    /// Append a step result. The recorded index always equals its position.
    pub fn append_step(&mut self, mut result: StepResult) {
        result.step_index = self.steps.len();
        self.steps.push(result);
    }

    /// Index of the first step lacking a successful completion, or
    /// `steps.len()` when every recorded step succeeded.
    pub fn resume_index(&self) -> usize {
        self.steps
            .iter()
            .position(|s| !s.is_done())
            .unwrap_or(self.steps.len())
    }

    /// Drop trailing results from the resume point on, keeping the replayed
    /// prefix. Used only when a resumed run re-attempts a failed position.
    pub fn truncate_to_resume_point(&mut self) {
        let idx = self.resume_index();
        self.steps.truncate(idx);
    }

    /// Transition into a terminal status and stamp `completed_at`.
    pub fn finalize(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn all_steps_succeeded(&self) -> bool {
        self.steps.iter().all(StepResult::is_done)
    }

    pub fn postconditions_passed(&self) -> bool {
        self.postcondition_results
            .as_ref()
            .is_none_or(|results| results.iter().all(|r| r.passed))
    }
}

// ---------------------------------------------------------------------------
// Checkpoint document
// ---------------------------------------------------------------------------

/// Durable snapshot of an execution log: the log plus checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(flatten)]
    pub log: ExecutionLog,
    pub checkpointed_at: DateTime<Utc>,
    /// Persist sequence number, incremented on every overwrite.
    pub version: u64,
}

impl Checkpoint {
    pub fn new(log: ExecutionLog, version: u64) -> Self {
        Self {
            log,
            checkpointed_at: Utc::now(),
            version,
        }
    }
}

/// Listing entry for a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub execution_id: Uuid,
    pub unit_id: String,
    pub status: ExecutionStatus,
    pub step_count: usize,
    pub checkpointed_at: DateTime<Utc>,
    pub version: u64,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            execution_id: cp.log.execution_id,
            unit_id: cp.log.unit_id.clone(),
            status: cp.log.status,
            step_count: cp.log.steps.len(),
            checkpointed_at: cp.checkpointed_at,
            version: cp.version,
        }
    }
}

/// Exclusive ownership of an execution id by one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub execution_id: Uuid,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    /// Set when a stale lease held by someone else was taken over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_owner: Option<String>,
}

impl Lease {
    pub fn new(execution_id: Uuid, owner: impl Into<String>) -> Self {
        Self {
            execution_id,
            owner: owner.into(),
            acquired_at: Utc::now(),
            previous_owner: None,
        }
    }

    /// Whether the lease is older than `ttl` at `now`.
    pub fn is_stale(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.acquired_at) >= ttl
    }
}

/// Aggregate status over every unit log of a run.
///
/// Failed if any unit failed, completed if all completed, rolled back if all
/// rolled back, otherwise running. An empty run is pending.
pub fn aggregate_status(logs: &[ExecutionLog]) -> ExecutionStatus {
    if logs.is_empty() {
        return ExecutionStatus::Pending;
    }
    if logs.iter().any(|l| l.status == ExecutionStatus::Failed) {
        ExecutionStatus::Failed
    } else if logs.iter().all(|l| l.status == ExecutionStatus::Completed) {
        ExecutionStatus::Completed
    } else if logs.iter().all(|l| l.status == ExecutionStatus::RolledBack) {
        ExecutionStatus::RolledBack
    } else {
        ExecutionStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Validation / resume outcomes
// ---------------------------------------------------------------------------

/// Structural validation result for a checkpoint document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

/// Whether a log can be resumed, and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeDecision {
    pub can_resume: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_step: Option<usize>,
}

impl ResumeDecision {
    pub fn resumable(from: usize) -> Self {
        Self {
            can_resume: true,
            reason: None,
            resume_from_step: Some(from),
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            can_resume: false,
            reason: Some(reason.into()),
            resume_from_step: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
