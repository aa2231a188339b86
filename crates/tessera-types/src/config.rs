//! Engine configuration types.
//!
//! `EngineConfig` represents `tessera.toml` in the data directory. Every field
//! has a default so an empty file (or no file) yields a working engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;
use crate::unit::RetryPolicy;

/// Default per-attempt step timeout (5 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Default run-level timeout (30 minutes).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 1800;

/// Default lease lifetime before another engine may take the run over.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 3600;

pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

/// Top-level configuration for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrency cap within a stage; the spec's own value wins when set.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Policy applied to steps whose unit and step declare none.
    #[serde(default)]
    pub default_retry: RetryPolicy,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    #[serde(default = "default_redaction_marker")]
    pub redaction_marker: String,

    /// Additional regex rules for the secret sanitizer.
    #[serde(default)]
    pub extra_secret_patterns: Vec<String>,
}

fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

fn default_redaction_marker() -> String {
    DEFAULT_REDACTION_MARKER.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            run_timeout_secs: DEFAULT_RUN_TIMEOUT_SECS,
            default_retry: RetryPolicy::default(),
            checkpoint: CheckpointConfig::default(),
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            redaction_marker: default_redaction_marker(),
            extra_secret_patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (name, value) in [
            ("step_timeout_secs", self.step_timeout_secs),
            ("run_timeout_secs", self.run_timeout_secs),
            ("lease_ttl_secs", self.lease_ttl_secs),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::Zero(name));
            }
        }
        if self.run_timeout_secs >= self.lease_ttl_secs {
            return Err(ConfigValidationError::LeaseShorterThanRun {
                run_timeout_secs: self.run_timeout_secs,
                lease_ttl_secs: self.lease_ttl_secs,
            });
        }
        Ok(())
    }
}

/// Where checkpoints are persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Directory (json) or database file (sqlite). Relative paths resolve
    /// against the data directory; None uses the backend default.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}
