//! Environment variable secret provider.
//!
//! Read-only. With a prefix configured, `{PREFIX}{KEY}` is checked first and
//! the bare key second, so `TESSERA_DB_PASSWORD` overrides `DB_PASSWORD`.

use tessera_core::repository::secret::SecretProvider;
use tessera_types::error::SecretError;

#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider {
    prefix: Option<String>,
}

impl EnvSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(val) => Some(val),
        // Secrets must be valid strings; non-Unicode values count as absent.
        Err(std::env::VarError::NotPresent | std::env::VarError::NotUnicode(_)) => None,
    }
}

impl SecretProvider for EnvSecretProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        if let Some(prefix) = &self.prefix {
            if let Some(val) = read_var(&format!("{prefix}{key}")) {
                return Ok(Some(val));
            }
        }
        Ok(read_var(key))
    }
}
