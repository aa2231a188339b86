//! Engine assembly from a data directory.

use std::path::Path;
use std::sync::Arc;

use tessera_core::engine::executor::ExecutionEngine;
use tessera_core::engine::step_runner::BoxStepExecutor;
use tessera_core::security::sanitizer::SecretSanitizer;
use tessera_types::config::EngineConfig;

use crate::checkpoint::{AnyCheckpointStore, open_checkpoint_store};
use crate::config::{ConfigError, load_engine_config};

/// Load `tessera.toml` from `data_dir` and build an engine around the
/// configured checkpoint store.
pub async fn build_engine(
    data_dir: &Path,
    executor: BoxStepExecutor,
) -> Result<ExecutionEngine<AnyCheckpointStore>, ConfigError> {
    let config = load_engine_config(data_dir).await;
    build_engine_with_config(config, data_dir, executor).await
}

/// Build an engine from an already-loaded configuration.
pub async fn build_engine_with_config(
    config: EngineConfig,
    data_dir: &Path,
    executor: BoxStepExecutor,
) -> Result<ExecutionEngine<AnyCheckpointStore>, ConfigError> {
    config.validate()?;
    let sanitizer = Arc::new(SecretSanitizer::from_config(&config)?);
    let store = open_checkpoint_store(&config.checkpoint, data_dir).await?;
    tracing::debug!(
        data_dir = %data_dir.display(),
        backend = ?store.backend(),
        "execution engine assembled"
    );
    Ok(ExecutionEngine::new(store, executor, sanitizer, config))
}
