//! Core error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the migration context and its value types.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A safety-relevant value was out of bounds. The previous value is retained.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The setting being changed.
        field: &'static str,
        /// Description of the violated bound.
        message: String,
    },

    /// A textual setting could not be parsed. Nothing was applied.
    #[error("cannot parse {what} {input:?}: {reason}")]
    Parse {
        /// What was being parsed (load map, instance key, ...).
        what: &'static str,
        /// The offending input fragment.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read or understood.
    #[error("cannot read config file {path}: {reason}")]
    ConfigRead {
        /// Path of the configuration file.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },
}

impl ContextError {
    pub(crate) fn parse(what: &'static str, input: impl Into<String>, reason: impl Into<String>) -> Self {
        ContextError::Parse {
            what,
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ContextError::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Result alias for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
