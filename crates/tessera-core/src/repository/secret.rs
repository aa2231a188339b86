//! Secret provider trait definition and its object-safe wrapper.
//!
//! Providers are read-only from the engine's point of view: steps look
//! secrets up by key, and `SecretService` registers every value it hands out
//! with the run's sanitizer.

use std::future::Future;
use std::pin::Pin;

use tessera_types::error::SecretError;

/// Trait for secret sources (environment, static maps, external vaults).
pub trait SecretProvider: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Retrieve a secret value by key.
    /// Returns None if the secret does not exist in this provider.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, SecretError>> + Send;
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

/// Object-safe version of [`SecretProvider`] with boxed futures.
pub trait SecretProviderDyn: Send + Sync {
    fn name(&self) -> &str;

    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, SecretError>> + Send + 'a>>;
}

impl<T: SecretProvider> SecretProviderDyn for T {
    fn name(&self) -> &str {
        SecretProvider::name(self)
    }

    fn get_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, SecretError>> + Send + 'a>> {
        Box::pin(self.get(key))
    }
}

/// Type-erased secret provider so heterogeneous providers can be chained.
pub struct BoxSecretProvider {
    inner: Box<dyn SecretProviderDyn>,
}

impl BoxSecretProvider {
    pub fn new<T: SecretProvider + 'static>(provider: T) -> Self {
        Self {
            inner: Box::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        self.inner.get_boxed(key).await
    }
}

impl std::fmt::Debug for BoxSecretProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxSecretProvider")
            .field("name", &self.inner.name())
            .finish()
    }
}
