//! Execution spec parsing and structural validation.
//!
//! Converts YAML or JSON files into the `ExecutionSpec` model and checks the
//! constraints that the graph builder does not: non-empty and unique ids,
//! unique step ids per unit, and sane retry and timeout values. Dependency
//! targets and cycles are the graph builder's concern.

use std::collections::HashSet;
use std::path::Path;

use tessera_types::unit::{ExecutionSpec, RetryPolicy};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SpecError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported spec format: {0}")]
    UnsupportedFormat(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `ExecutionSpec`.
pub fn parse_spec_yaml(yaml: &str) -> Result<ExecutionSpec, SpecError> {
    let spec: ExecutionSpec =
        serde_yaml_ng::from_str(yaml).map_err(|e| SpecError::Parse(e.to_string()))?;
    validate_spec(&spec)?;
    Ok(spec)
}

/// Parse a JSON string into a validated `ExecutionSpec`.
pub fn parse_spec_json(json: &str) -> Result<ExecutionSpec, SpecError> {
    let spec: ExecutionSpec =
        serde_json::from_str(json).map_err(|e| SpecError::Parse(e.to_string()))?;
    validate_spec(&spec)?;
    Ok(spec)
}

/// Load a spec file, choosing the parser by extension (`.yaml`, `.yml`,
/// `.json`).
pub fn load_spec_file(path: &Path) -> Result<ExecutionSpec, SpecError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)?;
    match ext.as_str() {
        "yaml" | "yml" => parse_spec_yaml(&content),
        "json" => parse_spec_json(&content),
        other => Err(SpecError::UnsupportedFormat(format!(
            "{} (extension '{other}')",
            path.display()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on an `ExecutionSpec`.
///
/// Checks:
/// - Name is non-empty
/// - At least one unit exists
/// - Unit ids are non-empty and unique
/// - Step ids are non-empty and unique within their unit
/// - No unit depends on itself
/// - Retry policies are sane (`initial_delay_ms <= max_delay_ms`)
/// - `max_concurrency >= 1` and step `timeout_secs > 0` if set
pub fn validate_spec(spec: &ExecutionSpec) -> Result<(), SpecError> {
    if spec.name.trim().is_empty() {
        return Err(SpecError::Validation("spec name must not be empty".to_string()));
    }
    if spec.units.is_empty() {
        return Err(SpecError::Validation(
            "spec must have at least one unit".to_string(),
        ));
    }
    if spec.max_concurrency == Some(0) {
        return Err(SpecError::Validation(
            "max_concurrency must be >= 1".to_string(),
        ));
    }

    let mut unit_ids = HashSet::new();
    for unit in &spec.units {
        if unit.id.trim().is_empty() {
            return Err(SpecError::Validation("unit id must not be empty".to_string()));
        }
        if !unit_ids.insert(unit.id.as_str()) {
            return Err(SpecError::Validation(format!("duplicate unit id: '{}'", unit.id)));
        }
        if unit.dependency_ids().any(|dep| dep == unit.id) {
            return Err(SpecError::Validation(format!(
                "unit '{}' depends on itself",
                unit.id
            )));
        }
        if let Some(policy) = &unit.retry {
            validate_policy(policy, &format!("unit '{}'", unit.id))?;
        }

        let mut step_ids = HashSet::new();
        for step in &unit.steps {
            if step.id.trim().is_empty() {
                return Err(SpecError::Validation(format!(
                    "unit '{}' has a step with an empty id",
                    unit.id
                )));
            }
            if !step_ids.insert(step.id.as_str()) {
                return Err(SpecError::Validation(format!(
                    "duplicate step id '{}' in unit '{}'",
                    step.id, unit.id
                )));
            }
            if step.timeout_secs == Some(0) {
                return Err(SpecError::Validation(format!(
                    "step '{}' in unit '{}': timeout must be > 0",
                    step.id, unit.id
                )));
            }
            if let Some(policy) = &step.retry {
                validate_policy(policy, &format!("step '{}' in unit '{}'", step.id, unit.id))?;
            }
        }
    }

    Ok(())
}

fn validate_policy(policy: &RetryPolicy, owner: &str) -> Result<(), SpecError> {
    if policy.initial_delay_ms > policy.max_delay_ms {
        return Err(SpecError::Validation(format!(
            "{owner}: initial_delay_ms ({}) exceeds max_delay_ms ({})",
            policy.initial_delay_ms, policy.max_delay_ms
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::unit::StepAction;

    const SPEC_YAML: &str = r#"
name: release
max_concurrency: 2
units:
  - id: schema
    steps:
      - id: migrate
        action:
          kind: command
          program: sqlx
          args: [migrate, run]
  - id: api
    type: feature
    dependencies:
      - target_id: schema
    retry:
      max_attempts: 3
      strategy: linear
    steps:
      - id: write
        action:
          kind: file
          path: src/api.rs
          operation: create
          content: "fn main() {}"
      - id: test
        timeout_secs: 60
        action:
          kind: test
          target: api
"#;

    #[test]
    fn test_parse_yaml_spec() {
        let spec = parse_spec_yaml(SPEC_YAML).unwrap();
        assert_eq!(spec.name, "release");
        assert_eq!(spec.units.len(), 2);
        assert_eq!(spec.max_concurrency, Some(2));
        let api = spec.unit("api").unwrap();
        assert_eq!(api.unit_type, "feature");
        assert_eq!(api.dependency_ids().collect::<Vec<_>>(), vec!["schema"]);
        assert_eq!(api.retry.as_ref().unwrap().max_attempts, 3);
        assert!(matches!(api.steps[1].action, StepAction::Test { .. }));
    }

    #[test]
    fn test_parse_json_spec() {
        let json = r#"{
            "name": "one",
            "units": [{"id": "a", "steps": [{"id": "s", "action": {"kind": "test", "target": "all"}}]}]
        }"#;
        let spec = parse_spec_json(json).unwrap();
        assert_eq!(spec.units[0].steps.len(), 1);
    }

    #[test]
    fn test_rejects_duplicate_unit() {
        let yaml = "name: x\nunits:\n  - id: a\n  - id: a\n";
        let err = parse_spec_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate unit id"));
    }

    #[test]
    fn test_rejects_duplicate_step() {
        let yaml = r#"
name: x
units:
  - id: a
    steps:
      - id: s
        action: { kind: test, target: t }
      - id: s
        action: { kind: test, target: t }
"#;
        let err = parse_spec_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate step id 's'"));
    }

    #[test]
    fn test_rejects_self_dependency_and_bad_policy() {
        let yaml = "name: x\nunits:\n  - id: a\n    dependencies: [{target_id: a}]\n";
        assert!(parse_spec_yaml(yaml).unwrap_err().to_string().contains("depends on itself"));

        let yaml = "name: x\nunits:\n  - id: a\n    retry: {initial_delay_ms: 5000, max_delay_ms: 10}\n";
        assert!(parse_spec_yaml(yaml).unwrap_err().to_string().contains("exceeds max_delay_ms"));
    }

    #[test]
    fn test_rejects_empty_spec() {
        assert!(parse_spec_yaml("name: x\nunits: []\n").is_err());
        assert!(matches!(parse_spec_yaml("name: [").unwrap_err(), SpecError::Parse(_)));
    }

    #[test]
    fn test_load_spec_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("release.yaml");
        std::fs::write(&yaml_path, SPEC_YAML).unwrap();
        assert_eq!(load_spec_file(&yaml_path).unwrap().name, "release");

        let txt_path = dir.path().join("release.txt");
        std::fs::write(&txt_path, SPEC_YAML).unwrap();
        assert!(matches!(
            load_spec_file(&txt_path).unwrap_err(),
            SpecError::UnsupportedFormat(_)
        ));
    }
}
