//! Error types for tether-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading, validating, or persisting local configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure, annotated with the path it happened at.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored configuration is not valid JSON.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (save path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `remote_root_path` is not of the form `<remote>:<path>`.
    #[error("invalid remote root '{value}': {reason}")]
    InvalidRemoteRoot { value: String, reason: &'static str },

    /// Setup needs a credential blob and none is stored.
    #[error("no credential blob configured")]
    MissingCredentials,

    /// The in-memory store lock was poisoned by a panicking writer.
    #[error("configuration store lock poisoned")]
    Poisoned,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
