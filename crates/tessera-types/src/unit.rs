//! Unit domain types for Tessera.
//!
//! An `ExecutionSpec` is a flat list of `Unit`s. Each unit declares dependency
//! edges to other units and an ordered list of steps. The engine turns the
//! units into stages and runs each unit's steps in order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Execution spec
// ---------------------------------------------------------------------------

/// A complete execution request: the set of units to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSpec {
    /// Human-readable name used in logs.
    pub name: String,
    /// Units forming the dependency graph. Input order breaks stage ties.
    pub units: Vec<Unit>,
    /// Maximum units running concurrently within a stage (None = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Extensible metadata handed to step executors through the context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionSpec {
    /// Look up a unit by id.
    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// One node of the dependency graph: a task or feature with ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unique unit id within the spec.
    pub id: String,
    /// Free-form unit type (e.g. "feature", "migration", "chore").
    #[serde(rename = "type", default = "default_unit_type")]
    pub unit_type: String,
    /// Outgoing dependency edges: this unit depends on each target.
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
    /// Declared inputs (artifact names this unit consumes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// Declared outputs (artifact names this unit produces).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Scheduling hint; higher runs earlier when a stage is throttled.
    #[serde(default)]
    pub priority: i32,
    /// Relative complexity estimate (1 = trivial).
    #[serde(default = "default_complexity")]
    pub complexity: u32,
    /// Ordered steps. Executed strictly sequentially.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Unit-level retry policy, applied to steps without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Invariants checked after every step has succeeded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postconditions: Vec<Postcondition>,
}

fn default_unit_type() -> String {
    "task".to_string()
}

fn default_complexity() -> u32 {
    1
}

impl Unit {
    /// Ids of every unit this unit depends on, in declaration order.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.target_id.as_str())
    }

    /// Ids of the hard dependencies only.
    pub fn hard_dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::Hard)
            .map(|d| d.target_id.as_str())
    }
}

/// A dependency edge from the owning unit to `target_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The unit that must finish first.
    pub target_id: String,
    #[serde(default)]
    pub kind: DependencyKind,
}

impl DependencyEdge {
    pub fn hard(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            kind: DependencyKind::Hard,
        }
    }
}

/// How strongly a unit depends on another. Every kind orders execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    #[default]
    Hard,
    Soft,
    Data,
    Optional,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One atomic operation inside a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within its unit.
    pub id: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// What the step does.
    pub action: StepAction,
    /// Per-attempt timeout in seconds (engine default applies when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Step-level retry policy, overriding the unit's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// Step payload, internally tagged by `kind`:
/// ```yaml
/// action:
///   kind: command
///   program: cargo
///   args: [test]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Create, overwrite, or delete a file.
    File {
        path: String,
        operation: FileOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// Run an external program.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Render a template into a file.
    Template {
        template: String,
        destination: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        variables: HashMap<String, serde_json::Value>,
    },
    /// Call an HTTP API.
    ApiCall {
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// Run a test suite or a single test target.
    Test {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
}

impl StepAction {
    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::File { .. } => "file",
            StepAction::Command { .. } => "command",
            StepAction::Template { .. } => "template",
            StepAction::ApiCall { .. } => "api_call",
            StepAction::Test { .. } => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Create,
    Overwrite,
    Append,
    Delete,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry configuration for a step or unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first try (1 = no retries).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Function mapping retry attempt number to wait time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

// ---------------------------------------------------------------------------
// Postconditions
// ---------------------------------------------------------------------------

/// A declared invariant checked after all of a unit's steps succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postcondition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub check: PostconditionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostconditionKind {
    /// A file must exist after the unit ran.
    FileExists { path: String },
    /// A command must exit successfully.
    CommandSucceeds {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// The output of a step must contain a substring.
    OutputContains { step_id: String, needle: String },
    /// Checker-defined invariant.
    Custom {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_defaults_from_yaml() {
        let yaml = r#"
id: api
steps:
  - id: build
    action:
      kind: command
      program: cargo
      args: [build]
"#;
        let unit: Unit = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(unit.unit_type, "task");
        assert_eq!(unit.complexity, 1);
        assert!(unit.dependencies.is_empty());
        assert_eq!(unit.steps[0].action.kind(), "command");
    }

    #[test]
    fn test_dependency_kind_defaults_to_hard() {
        let yaml = "target_id: db";
        let edge: DependencyEdge = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(edge.kind, DependencyKind::Hard);
    }

    #[test]
    fn test_hard_dependency_ids_filters_kinds() {
        let unit = Unit {
            id: "web".to_string(),
            unit_type: "feature".to_string(),
            dependencies: vec![
                DependencyEdge::hard("api"),
                DependencyEdge {
                    target_id: "docs".to_string(),
                    kind: DependencyKind::Soft,
                },
            ],
            inputs: vec![],
            outputs: vec![],
            priority: 0,
            complexity: 1,
            steps: vec![],
            retry: None,
            postconditions: vec![],
        };
        assert_eq!(unit.dependency_ids().count(), 2);
        assert_eq!(unit.hard_dependency_ids().collect::<Vec<_>>(), vec!["api"]);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.strategy, BackoffStrategy::Exponential);
        assert_eq!(policy.initial_delay_ms, 1_000);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    #[test]
    fn test_step_action_api_call_tag() {
        let json = serde_json::json!({
            "kind": "api_call",
            "method": "POST",
            "url": "https://example.com/hooks"
        });
        let action: StepAction = serde_json::from_value(json).unwrap();
        assert_eq!(action.kind(), "api_call");
    }
}
