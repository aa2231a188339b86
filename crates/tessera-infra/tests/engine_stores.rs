//! End-to-end runs of the execution engine against the durable stores.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Value, json};
use chrono::Utc;
use tessera_core::engine::checkpoint::{CheckpointError, CheckpointManager};
use tessera_core::engine::context::ExecutionContext;
use tessera_core::engine::definition::load_spec_file;
use tessera_core::engine::executor::{ExecutionEngine, ExecutorError};
use tessera_core::engine::step_runner::{
    ApiCallRequest, BoxStepExecutor, CommandRequest, FileRequest, StepError, StepExecutor,
    StepOutcome, TemplateRequest, TestRequest,
};
use tessera_core::repository::checkpoint::CheckpointRepository;
use tessera_core::security::sanitizer::SecretSanitizer;
use tessera_infra::bootstrap::build_engine;
use tessera_infra::checkpoint::JsonFileCheckpointStore;
use tessera_infra::sqlite::checkpoint::SqliteCheckpointStore;
use tessera_infra::sqlite::pool::DatabasePool;
use tessera_types::config::EngineConfig;
use tessera_types::execution::{ExecutionLog, ExecutionStatus, PostconditionResult, StepResult};
use tessera_types::unit::{ExecutionSpec, StepDefinition};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// Succeeds every step except those with a remaining failure budget, keyed
/// by "unit/step". Records every attempt.
#[derive(Clone, Default)]
struct Scripted {
    failures: Arc<DashMap<String, u32>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn failing(key: &str, times: u32) -> Self {
        let script = Self::default();
        script.failures.insert(key.to_string(), times);
        script
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn attempt(&self, step: &StepDefinition, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        let key = format!("{}/{}", ctx.unit_id, step.id);
        self.calls.lock().unwrap().push(key.clone());
        if let Some(mut remaining) = self.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StepError::ExecutionFailed(format!("{key} exploded")));
            }
        }
        Ok(StepOutcome::succeeded(Some(json!({ "step": key }))))
    }
}

impl StepExecutor for Scripted {
    async fn execute_file(&self, step: &StepDefinition, _r: FileRequest<'_>, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        self.attempt(step, ctx)
    }

    async fn execute_command(&self, step: &StepDefinition, _r: CommandRequest<'_>, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        self.attempt(step, ctx)
    }

    async fn execute_template(&self, step: &StepDefinition, r: TemplateRequest<'_>, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        let rendered = ctx.resolve_template(r.template);
        self.attempt(step, ctx)?;
        Ok(StepOutcome::succeeded(Some(Value::String(rendered))))
    }

    async fn execute_api_call(&self, step: &StepDefinition, _r: ApiCallRequest<'_>, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        self.attempt(step, ctx)
    }

    async fn execute_test(&self, step: &StepDefinition, _r: TestRequest<'_>, ctx: &ExecutionContext) -> Result<StepOutcome, StepError> {
        self.attempt(step, ctx)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const RELEASE_SPEC: &str = r#"
name: release
metadata:
  env: staging
units:
  - id: schema
    steps:
      - id: migrate
        action: { kind: command, program: sqlx, args: [migrate, run] }
  - id: api
    dependencies:
      - target_id: schema
    steps:
      - id: write
        action: { kind: file, path: src/api.rs, operation: create, content: "fn main() {}" }
      - id: config
        action:
          kind: template
          template: "env={{ variables.env }}"
          destination: config/api.toml
      - id: test
        action: { kind: test, target: api }
  - id: web
    dependencies:
      - target_id: api
    steps:
      - id: deploy
        action: { kind: api_call, method: POST, url: "https://deploy.example.com/web" }
"#;

fn release_spec(dir: &Path) -> ExecutionSpec {
    let path = dir.join("release.yaml");
    std::fs::write(&path, RELEASE_SPEC).unwrap();
    load_spec_file(&path).unwrap()
}

fn engine_over<R: CheckpointRepository + 'static>(repo: R, script: &Scripted) -> ExecutionEngine<R> {
    ExecutionEngine::new(
        repo,
        BoxStepExecutor::new(script.clone()),
        Arc::new(SecretSanitizer::default()),
        EngineConfig::default(),
    )
}

/// A finished log carrying every optional field, and a bare running one.
fn sample_logs(execution_id: Uuid) -> (ExecutionLog, ExecutionLog) {
    let mut full = ExecutionLog::start(execution_id, "api");
    full.append_step(StepResult {
        step_index: 0,
        success: true,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
        duration_ms: 42,
        retry_attempts: 1,
        output: Some(json!({ "path": "src/api.rs", "bytes": 12, "tags": ["a", "b"] })),
        error: None,
        skipped: false,
    });
    full.append_step(StepResult {
        step_index: 1,
        success: false,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
        duration_ms: 7,
        retry_attempts: 0,
        output: None,
        error: Some("tests failed".to_string()),
        skipped: false,
    });
    full.postcondition_results = Some(vec![PostconditionResult {
        postcondition_id: "builds".to_string(),
        passed: false,
        message: "cargo build exited 101".to_string(),
        checked_at: Utc::now(),
    }]);
    full.finalize(ExecutionStatus::Failed);

    let bare = ExecutionLog::start(execution_id, "web");
    (full, bare)
}

async fn assert_round_trip<R: CheckpointRepository>(repo: R) {
    let manager = CheckpointManager::new(repo, Arc::new(SecretSanitizer::default()));
    let execution_id = Uuid::now_v7();
    let (full, bare) = sample_logs(execution_id);
    assert!(bare.completed_at.is_none() && bare.postcondition_results.is_none());

    manager.save(&bare).await.unwrap();
    manager.save(&full).await.unwrap();

    let loaded = manager.load_logs(&execution_id).await.unwrap();
    assert_eq!(loaded, vec![full, bare]);
}

/// Fail `api/test` once, resume, and check the combined outcome.
async fn fail_then_resume<R: CheckpointRepository + 'static>(engine: &ExecutionEngine<R>, script: &Scripted, spec: &ExecutionSpec) {
    let first = engine.execute(spec).await.unwrap();
    assert!(!first.success);
    assert_eq!(first.completed_units, vec!["schema"]);
    let web = first.log("web").unwrap();
    assert_eq!(web.status, ExecutionStatus::Pending);
    assert!(web.steps.is_empty());
    let api = first.log("api").unwrap();
    assert_eq!(api.status, ExecutionStatus::Failed);
    assert_eq!(api.steps.len(), 3);
    assert_eq!(
        api.steps[1].output,
        Some(Value::String("env=staging".to_string()))
    );

    // Stores return logs ordered by unit id.
    let stored = engine.checkpoint().load_logs(&first.execution_id).await.unwrap();
    let mut expected = first.logs.clone();
    expected.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
    assert_eq!(stored, expected);

    let second = engine.resume(first.execution_id, spec).await.unwrap();
    assert!(second.success, "resume failed: {:?}", second.error);
    assert_eq!(second.completed_units, vec!["schema", "api", "web"]);
    assert_eq!(
        script.calls(),
        vec![
            "schema/migrate",
            "api/write",
            "api/config",
            "api/test",
            "api/test",
            "web/deploy",
        ]
    );

    let err = engine.resume(first.execution_id, spec).await.unwrap_err();
    assert!(matches!(err, ExecutorError::NotResumable { .. }));
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_json_store_fail_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));
    let script = Scripted::failing("api/test", 1);
    let engine = engine_over(store.clone(), &script);

    fail_then_resume(&engine, &script, &release_spec(dir.path())).await;

    let runs = store.list_executions().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(!store.lease_path(&runs[0]).exists());
}

#[tokio::test]
async fn test_json_store_round_trips_logs() {
    let dir = tempfile::tempdir().unwrap();
    assert_round_trip(JsonFileCheckpointStore::new(dir.path().join("checkpoints"))).await;
}

#[tokio::test]
async fn test_json_documents_are_camel_case() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));
    let engine = engine_over(store.clone(), &Scripted::default());

    let result = engine.execute(&release_spec(dir.path())).await.unwrap();
    assert!(result.success);

    let raw = std::fs::read_to_string(store.document_path(&result.execution_id, "api")).unwrap();
    let doc: Value = serde_json::from_str(&raw).unwrap();
    for key in ["executionId", "unitId", "status", "startedAt", "completedAt", "steps", "rollbackExecuted", "checkpointedAt", "version"] {
        assert!(doc.get(key).is_some(), "missing {key}");
    }
    assert_eq!(doc["status"], "completed");
    assert_eq!(doc["steps"][2]["stepIndex"], 2);
    assert!(doc.get("postconditionResults").is_none());
}

#[tokio::test]
async fn test_json_corrupt_checkpoint_blocks_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));
    let script = Scripted::failing("api/test", 1);
    let engine = engine_over(store.clone(), &script);
    let spec = release_spec(dir.path());

    let result = engine.execute(&spec).await.unwrap();
    let path = store.document_path(&result.execution_id, "api");
    let mut doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    doc["steps"][1]["stepIndex"] = json!(7);
    std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    match engine.resume(result.execution_id, &spec).await.unwrap_err() {
        ExecutorError::Checkpoint(CheckpointError::Invalid { errors }) => {
            assert!(errors.iter().any(|e| e.starts_with("api: ") && e.contains("index 7")));
        }
        other => panic!("expected invalid checkpoint, got {other:?}"),
    }
    assert_eq!(script.calls().len(), 4);
}

#[tokio::test]
async fn test_json_lease_blocks_second_engine() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileCheckpointStore::new(dir.path().join("checkpoints"));
    let spec = release_spec(dir.path());
    let first = engine_over(store.clone(), &Scripted::failing("schema/migrate", 1));
    let result = first.execute(&spec).await.unwrap();

    store
        .acquire_lease(&result.execution_id, "other-node", Duration::from_secs(3600))
        .await
        .unwrap();

    let second = engine_over(store.clone(), &Scripted::default());
    let err = second.resume(result.execution_id, &spec).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Checkpoint(CheckpointError::LeaseHeld { .. })
    ));
}

// ---------------------------------------------------------------------------
// SQLite store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sqlite_store_fail_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::open(&dir.path().join("checkpoints.db")).await.unwrap();
    let script = Scripted::failing("api/test", 1);
    let engine = engine_over(SqliteCheckpointStore::new(pool), &script);

    fail_then_resume(&engine, &script, &release_spec(dir.path())).await;

    let summaries = engine.list_checkpoints().await.unwrap();
    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|s| s.status == ExecutionStatus::Completed));
}

#[tokio::test]
async fn test_sqlite_store_round_trips_logs() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::open(&dir.path().join("checkpoints.db")).await.unwrap();
    assert_round_trip(SqliteCheckpointStore::new(pool)).await;
}

#[tokio::test]
async fn test_sqlite_rollback_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::open(&dir.path().join("checkpoints.db")).await.unwrap();
    let engine = engine_over(SqliteCheckpointStore::new(pool), &Scripted::default());
    let spec = release_spec(dir.path());

    let result = engine.execute(&spec).await.unwrap();
    let logs = engine.rollback(result.execution_id).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.status == ExecutionStatus::RolledBack));

    assert!(engine.delete_checkpoint(result.execution_id).await.unwrap());
    assert!(engine.list_checkpoints().await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_engine_from_data_dir() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    tokio::fs::write(
        dir.path().join("tessera.toml"),
        "[checkpoint]\nbackend = \"sqlite\"\npath = \"state/runs.db\"\n",
    )
    .await?;

    let script = Scripted::default();
    let engine = build_engine(dir.path(), BoxStepExecutor::new(script.clone())).await?;
    let result = engine.execute(&release_spec(dir.path())).await?;

    assert!(result.success);
    assert_eq!(script.calls().len(), 5);
    assert!(dir.path().join("state/runs.db").exists());
    Ok(())
}
