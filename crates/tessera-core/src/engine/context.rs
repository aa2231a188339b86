//! Per-unit execution context handed to step executors and checkers.
//!
//! `ExecutionContext` carries the run identity, the attempt being made, the
//! outputs of earlier steps of the same unit, the run's `SecretSanitizer`, and
//! the run's cancellation token. Adapters use it to build idempotency keys,
//! resolve `{{ ... }}` placeholders, and stop early on cancellation.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::security::sanitizer::SecretSanitizer;

use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(steps|variables)\.([A-Za-z0-9_\-]+)(?:\.output)?\s*\}\}")
        .expect("placeholder pattern must compile")
});

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub unit_id: String,
    /// Position of the step currently being attempted.
    pub step_index: usize,
    /// Retry number of the current attempt (0 = first try).
    pub attempt: u32,
    /// Run-wide variables (the execution spec's metadata).
    pub variables: HashMap<String, Value>,
    /// Outputs of earlier steps of this unit, keyed by step id.
    step_outputs: HashMap<String, Value>,
    sanitizer: Arc<SecretSanitizer>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        execution_id: Uuid,
        unit_id: impl Into<String>,
        sanitizer: Arc<SecretSanitizer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            unit_id: unit_id.into(),
            step_index: 0,
            attempt: 0,
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
            sanitizer,
            cancel,
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Point the context at a specific attempt of a step.
    pub fn begin_attempt(&mut self, step_index: usize, attempt: u32) {
        self.step_index = step_index;
        self.attempt = attempt;
    }

    /// Idempotency key of the current attempt.
    pub fn idempotency_key(&self) -> String {
        RetryHandler::idempotency_key(&self.execution_id, &self.unit_id, self.step_index, self.attempt)
    }

    pub fn sanitizer(&self) -> &Arc<SecretSanitizer> {
        &self.sanitizer
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // -----------------------------------------------------------------------
    // Step outputs
    // -----------------------------------------------------------------------

    /// Store the output of a completed step.
    ///
    /// Outputs larger than `MAX_STEP_OUTPUT_SIZE` are replaced by a marker
    /// object recording the original size.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                unit_id = %self.unit_id,
                step_id,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            self.step_outputs.insert(
                step_id.to_string(),
                json!({ "_truncated": true, "_original_size": size }),
            );
        } else {
            self.step_outputs.insert(step_id.to_string(), output);
        }
    }

    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    /// Resolve `{{ steps.<id>.output }}` and `{{ variables.<name> }}`.
    ///
    /// Unknown references are left untouched. String values are inserted
    /// verbatim, everything else as compact JSON.
    pub fn resolve_template(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let source = match &caps[1] {
                    "steps" => &self.step_outputs,
                    _ => &self.variables,
                };
                match source.get(&caps[2]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            Uuid::nil(),
            "api",
            Arc::new(SecretSanitizer::default()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_idempotency_key_tracks_attempt() {
        let mut c = ctx();
        c.begin_attempt(2, 1);
        assert_eq!(c.idempotency_key(), format!("{}-api-2-1", Uuid::nil()));
    }

    #[test]
    fn test_resolve_template() {
        let mut c = ctx().with_variables(HashMap::from([("env".to_string(), json!("staging"))]));
        c.set_step_output("build", json!({"artifact": "app.tar"}));
        c.set_step_output("version", json!("1.4.2"));

        let out = c.resolve_template("deploy {{ steps.version.output }} to {{variables.env}}");
        assert_eq!(out, "deploy 1.4.2 to staging");

        let out = c.resolve_template("{{ steps.build.output }} {{ steps.missing.output }}");
        assert_eq!(out, r#"{"artifact":"app.tar"} {{ steps.missing.output }}"#);
    }

    #[test]
    fn test_oversized_output_truncated() {
        let mut c = ctx();
        c.set_step_output("big", Value::String("x".repeat(MAX_STEP_OUTPUT_SIZE + 1)));
        assert_eq!(c.step_output("big").unwrap()["_truncated"], true);
    }

    #[test]
    fn test_cancellation_visible_through_context() {
        let c = ctx();
        let clone = c.clone();
        c.cancellation_token().cancel();
        assert!(clone.is_cancelled());
    }
}
