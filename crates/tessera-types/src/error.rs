use thiserror::Error;

/// Errors from repository operations (used by trait definitions in tessera-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

/// Errors related to secret resolution.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// An engine configuration that cannot be run safely.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// The lease is taken once per run and never renewed, so it must
    /// outlive the run timeout or another engine could take the run over.
    #[error("lease_ttl_secs ({lease_ttl_secs}) must exceed run_timeout_secs ({run_timeout_secs})")]
    LeaseShorterThanRun {
        run_timeout_secs: u64,
        lease_ttl_secs: u64,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}
