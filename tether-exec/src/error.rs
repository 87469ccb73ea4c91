use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tether_core::EndpointId;

/// Failures of the channel or of the execute call itself.
///
/// A command that completes with a non-zero exit status is not an error;
/// it is a [`tether_core::CommandResult`] with `success == false`.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("connection to endpoint {endpoint} failed: {reason}")]
    Connection { endpoint: EndpointId, reason: String },

    #[error("endpoint {endpoint} did not become ready within {timeout:?}")]
    ConnectTimeout {
        endpoint: EndpointId,
        timeout: Duration,
    },

    #[error("credentials for endpoint {endpoint} expired at {expired_at}")]
    TokenExpired {
        endpoint: EndpointId,
        expired_at: DateTime<Utc>,
    },

    #[error("no completion marker within {timeout:?} for command: {command}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("executor was disconnected while the command was pending")]
    Disconnected,

    #[error("executor has been disposed")]
    Disposed,
}

impl ExecError {
    pub(crate) fn connection(endpoint: &EndpointId, reason: impl ToString) -> Self {
        ExecError::Connection {
            endpoint: endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    /// The channel is unusable, as opposed to a slow command.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ExecError::Connection { .. }
                | ExecError::ConnectTimeout { .. }
                | ExecError::TokenExpired { .. }
                | ExecError::Disconnected
        )
    }
}
