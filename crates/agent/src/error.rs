//! Error types for execution and configuration.

use thiserror::Error;

/// Failures surfaced by [`crate::ExecutionStrategySelector`].
///
/// Remote-eligibility checks never produce one of these: an unreachable
/// service simply means the batch runs locally.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Local execution needs credentials for services that have none.
    #[error("missing credentials for local execution: {}", services.join(", "))]
    MissingCredentials {
        /// Lowercase service names, sorted.
        services: Vec<String>,
    },
    /// Submitting or polling the remote job failed.
    #[error("remote execution failed: {0:#}")]
    Remote(#[source] anyhow::Error),
    /// The local runner failed as a whole.
    #[error("local execution failed: {0:#}")]
    Local(#[source] anyhow::Error),
}

/// Invalid agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("read config {path}: {source}")]
    Read {
        /// Path as given.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`crate::config::AgentConfig`].
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A `model_concurrency` key is not `service/model`.
    #[error("model concurrency key must look like service/model, got {0:?}")]
    InvalidModelKey(String),
    /// A concurrency limit of zero.
    #[error("concurrency limit for {0} must be at least 1")]
    ZeroConcurrency(String),
}
