//! CLI error types.

use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// A setting was rejected by the migration context.
    #[error("context error: {0}")]
    Context(#[from] ghostmig_core::ContextError),

    /// Flags that cannot be combined.
    #[error("configuration error: {0}")]
    Config(String),

    /// The throttler asked to stop before anything started.
    #[error("migration aborted: {0}")]
    Aborted(String),

    /// The report could not be rendered.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;
