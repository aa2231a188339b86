//! Secret chain builder: wires concrete providers in priority order.
//!
//! Lives in `tessera-infra` because it assembles concrete providers. The
//! resulting chain is handed to `SecretService` in `tessera-core`, which
//! registers every resolved value with the run's sanitizer.

use std::sync::Arc;

use tessera_core::repository::secret::BoxSecretProvider;
use tessera_core::security::sanitizer::SecretSanitizer;
use tessera_core::service::secret::SecretService;

use super::StaticSecretProvider;
use super::env::EnvSecretProvider;

/// Build the secret resolution chain (first match wins):
/// 1. Environment variables, if `env` is given
/// 2. Each static provider, in order
pub fn build_secret_chain(
    env: Option<EnvSecretProvider>,
    statics: Vec<StaticSecretProvider>,
) -> Vec<BoxSecretProvider> {
    let mut chain = Vec::with_capacity(statics.len() + 1);
    if let Some(env) = env {
        chain.push(BoxSecretProvider::new(env));
    }
    chain.extend(statics.into_iter().map(BoxSecretProvider::new));
    chain
}

/// `SecretService` over the default chain (environment only) sharing the
/// engine's sanitizer.
pub fn default_secret_service(sanitizer: Arc<SecretSanitizer>) -> SecretService {
    SecretService::new(
        build_secret_chain(Some(EnvSecretProvider::new()), Vec::new()),
        sanitizer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_order_and_registration() {
        let sanitizer = Arc::new(SecretSanitizer::default());
        let chain = build_secret_chain(
            None,
            vec![
                StaticSecretProvider::new("primary").with_secret("DB_PASSWORD", "hunter2-primary"),
                StaticSecretProvider::new("fallback")
                    .with_secret("DB_PASSWORD", "hunter2-fallback")
                    .with_secret("API_TOKEN", "tok_fallback_only"),
            ],
        );
        assert_eq!(chain.len(), 2);

        let service = SecretService::new(chain, Arc::clone(&sanitizer));
        assert_eq!(service.provider_names(), vec!["primary", "fallback"]);

        let password = service.get_secret("DB_PASSWORD").await.unwrap().unwrap();
        assert_eq!(password.expose(), "hunter2-primary");
        service.require_secret("API_TOKEN").await.unwrap();

        assert_eq!(
            sanitizer.sanitize("login hunter2-primary with tok_fallback_only"),
            "login [REDACTED] with [REDACTED]"
        );
    }

    #[test]
    fn test_default_service_uses_env() {
        let service = default_secret_service(Arc::new(SecretSanitizer::default()));
        assert_eq!(service.provider_names(), vec!["env"]);
    }
}
