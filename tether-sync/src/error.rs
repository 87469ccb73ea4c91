//! Error types for tether-sync.

use thiserror::Error;

use tether_core::ConfigError;
use tether_exec::ExecError;

/// Failures of a setup or sync flow.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The channel broke or a command never completed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Local configuration could not be loaded, saved, or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local configuration is present but unusable for this flow.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote-side precondition is not met.
    #[error("validation error: {0}")]
    Validation(String),

    /// A remote command completed with a non-zero exit status.
    #[error("{step} failed: {message}")]
    StepFailed { step: &'static str, message: String },
}
