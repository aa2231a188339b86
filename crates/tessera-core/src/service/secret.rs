//! Secret resolution service.
//!
//! `SecretService` resolves secrets through a chain of providers in priority
//! order (first match wins) and registers every value it returns with the
//! run's `SecretSanitizer`, so a secret can never reach a checkpoint or a log
//! line unredacted once a step has looked it up.

use std::sync::Arc;

use tessera_types::error::SecretError;
use tessera_types::secret::Redacted;

use crate::repository::secret::BoxSecretProvider;
use crate::security::sanitizer::SecretSanitizer;

pub struct SecretService {
    providers: Vec<BoxSecretProvider>,
    sanitizer: Arc<SecretSanitizer>,
}

impl SecretService {
    /// Providers should be ordered by precedence (highest priority first).
    pub fn new(providers: Vec<BoxSecretProvider>, sanitizer: Arc<SecretSanitizer>) -> Self {
        Self {
            providers,
            sanitizer,
        }
    }

    pub fn sanitizer(&self) -> &Arc<SecretSanitizer> {
        &self.sanitizer
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve a secret by key.
    ///
    /// Unavailable providers are skipped with a warning; other provider
    /// errors abort the lookup.
    pub async fn get_secret(&self, key: &str) -> Result<Option<Redacted>, SecretError> {
        for provider in &self.providers {
            match provider.get(key).await {
                Ok(Some(value)) => {
                    self.sanitizer.register(&value);
                    tracing::debug!(key, provider = provider.name(), "resolved secret");
                    return Ok(Some(Redacted::new(value)));
                }
                Ok(None) => continue,
                Err(SecretError::ProviderUnavailable(reason)) => {
                    tracing::warn!(provider = provider.name(), %reason, "secret provider unavailable");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Like [`get_secret`](Self::get_secret) but a missing key is an error.
    pub async fn require_secret(&self, key: &str) -> Result<Redacted, SecretError> {
        self.get_secret(key)
            .await?
            .ok_or_else(|| SecretError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::repository::secret::SecretProvider;

    struct MapProvider {
        name: &'static str,
        values: HashMap<String, String>,
    }

    impl MapProvider {
        fn new(name: &'static str, pairs: &[(&str, &str)]) -> Self {
            Self {
                name,
                values: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl SecretProvider for MapProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
            Ok(self.values.get(key).cloned())
        }
    }

    struct DownProvider;

    impl SecretProvider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, SecretError> {
            Err(SecretError::ProviderUnavailable("offline".to_string()))
        }
    }

    fn service(providers: Vec<BoxSecretProvider>) -> SecretService {
        SecretService::new(providers, Arc::new(SecretSanitizer::default()))
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let svc = service(vec![
            BoxSecretProvider::new(MapProvider::new("high", &[("DB_PASSWORD", "from-high")])),
            BoxSecretProvider::new(MapProvider::new("low", &[("DB_PASSWORD", "from-low")])),
        ]);
        let value = svc.get_secret("DB_PASSWORD").await.unwrap().unwrap();
        assert_eq!(value.expose(), "from-high");
        assert_eq!(svc.provider_names(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_resolved_values_are_registered() {
        let svc = service(vec![BoxSecretProvider::new(MapProvider::new(
            "map",
            &[("STRIPE_KEY", "sk_live_abc123")],
        ))]);
        svc.get_secret("STRIPE_KEY").await.unwrap();
        assert_eq!(svc.sanitizer().sanitize("using sk_live_abc123"), "using [REDACTED]");
    }

    #[tokio::test]
    async fn test_unavailable_provider_skipped() {
        let svc = service(vec![
            BoxSecretProvider::new(DownProvider),
            BoxSecretProvider::new(MapProvider::new("map", &[("K", "value-1234")])),
        ]);
        assert!(svc.get_secret("K").await.unwrap().is_some());
        assert!(svc.get_secret("MISSING").await.unwrap().is_none());
        assert!(matches!(
            svc.require_secret("MISSING").await,
            Err(SecretError::NotFound(_))
        ));
    }
}
