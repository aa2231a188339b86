//! Engine configuration loader.
//!
//! Reads `tessera.toml` from the data directory (`~/.tessera/` unless
//! `TESSERA_DATA_DIR` is set) and deserializes it into [`EngineConfig`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use tessera_core::security::sanitizer::SanitizerError;
use tessera_types::config::EngineConfig;
use tessera_types::error::ConfigValidationError;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Errors while turning a configuration into live components.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid secret pattern: {0}")]
    Sanitizer(#[from] SanitizerError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigValidationError),
}

/// Resolve the data directory: `TESSERA_DATA_DIR`, else `~/.tessera`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TESSERA_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tessera")
}

/// Load engine configuration from `{data_dir}/tessera.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config file found, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            EngineConfig::default()
        }
    }
}

/// Resolve a configured path against the data directory.
///
/// Absolute paths are kept; relative ones are joined to `data_dir`; `None`
/// becomes `data_dir/fallback`.
pub fn resolve_path(configured: Option<&Path>, data_dir: &Path, fallback: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => data_dir.join(path),
        None => data_dir.join(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_types::config::CheckpointBackend;

    #[tokio::test]
    async fn test_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
run_timeout_secs = 600
lease_ttl_secs = 900

[checkpoint]
backend = "sqlite"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.run_timeout_secs, 600);
        assert_eq!(config.lease_ttl_secs, 900);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Sqlite);
        assert_eq!(config.step_timeout_secs, 300);
    }

    #[tokio::test]
    async fn test_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "this is not { valid toml")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_resolve_path() {
        let data = Path::new("/var/lib/tessera");
        assert_eq!(
            resolve_path(None, data, "checkpoints"),
            PathBuf::from("/var/lib/tessera/checkpoints")
        );
        assert_eq!(
            resolve_path(Some(Path::new("runs.db")), data, "checkpoints.db"),
            PathBuf::from("/var/lib/tessera/runs.db")
        );
        assert_eq!(
            resolve_path(Some(Path::new("/tmp/cp")), data, "checkpoints"),
            PathBuf::from("/tmp/cp")
        );
    }

    #[test]
    fn test_default_data_dir_is_named() {
        let dir = default_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
