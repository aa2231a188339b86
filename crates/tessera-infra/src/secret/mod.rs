//! Secret provider implementations.
//!
//! - `env`: environment variables (read-only, highest priority)
//! - `chain`: assembles providers in priority order
//! - `StaticSecretProvider`: fixed key/value map, for tests and embedding

pub mod chain;
pub mod env;

use std::collections::HashMap;

use tessera_core::repository::secret::SecretProvider;
use tessera_types::error::SecretError;

/// Secret provider over a fixed map of values.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    name: String,
    values: HashMap<String, String>,
}

impl StaticSecretProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for StaticSecretProvider {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            name: "static".to_string(),
            values: iter.into_iter().collect(),
        }
    }
}

impl SecretProvider for StaticSecretProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.values.get(key).cloned())
    }
}
