//! Domain types shared by the executor and the sync engine.
//!
//! Endpoint descriptors are owned by the assignment collaborator and only
//! read here. [`SyncConfig`] is persisted through a [`crate::ConfigStore`];
//! [`SyncStatus`] is never persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::naming;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a remote compute endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// An addressable remote compute target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: EndpointId,
    /// Terminal service address, e.g. `wss://host/colab/tty`.
    pub address: String,
    /// Bearer token presented when the channel is opened.
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl EndpointDescriptor {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// Command result
// ---------------------------------------------------------------------------

/// Outcome of one command that ran to completion on the remote shell.
///
/// A command that never completes is an executor error, not a `CommandResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// Result for a command whose completion marker carried `exit_code`.
    pub fn from_exit(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            success: exit_code == 0,
            output: output.into(),
            exit_code: Some(exit_code),
            error: None,
        }
    }

    /// Success produced locally, without a remote command.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: None,
            error: None,
        }
    }

    /// Failure produced by interpreting a previous step.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            exit_code: None,
            error: Some(message.into()),
        }
    }

    /// Attach an explanation to a failed result.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Best human-readable explanation: the error if set, otherwise the
    /// last non-empty output line, otherwise the exit code.
    pub fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        if let Some(line) = self
            .output
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty() && !line.contains(":exit="))
        {
            return line.to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with status {code}"),
            None => "command failed".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote root and sync pair
// ---------------------------------------------------------------------------

/// A parsed `<remote>:<path>` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteRoot {
    pub remote: String,
    pub path: String,
}

impl RemoteRoot {
    /// Parse `<remote>:<path>`. The path must be non-empty and must not be
    /// the remote root itself.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidRemoteRoot {
            value: value.to_string(),
            reason,
        };

        let (remote, path) = value.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        if remote.is_empty() {
            return Err(invalid("remote name is empty"));
        }
        if remote.contains('/') || remote.chars().any(char::is_whitespace) {
            return Err(invalid("remote name contains '/' or whitespace"));
        }
        if path.trim_matches('/').trim().is_empty() {
            return Err(invalid("path must name a directory below the remote root"));
        }
        Ok(Self {
            remote: remote.to_string(),
            path: path.to_string(),
        })
    }

    /// The bare remote, e.g. `drive1:`.
    pub fn remote_spec(&self) -> String {
        format!("{}:", self.remote)
    }
}

impl fmt::Display for RemoteRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.remote, self.path)
    }
}

/// A local directory on the endpoint paired with a remote root.
///
/// `local` is always bisync's path1 and `remote` always path2. Every state
/// identifier in the system is computed through this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SyncPair {
    pub local: String,
    pub remote: RemoteRoot,
}

impl SyncPair {
    pub fn new(local: impl Into<String>, remote: RemoteRoot) -> Self {
        Self {
            local: local.into(),
            remote,
        }
    }

    /// Identifier rclone uses for this pair's bisync listings.
    pub fn state_id(&self) -> String {
        naming::state_identifier(&self.local, &self.remote.to_string())
    }

    /// Identifier the same pair would get with path1/path2 swapped.
    pub fn reversed_state_id(&self) -> String {
        naming::state_identifier(&self.remote.to_string(), &self.local)
    }
}

// ---------------------------------------------------------------------------
// Sync configuration
// ---------------------------------------------------------------------------

/// Workspace-scoped sync configuration, persisted by a [`crate::ConfigStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// `<remote>:<path>` on the cloud side.
    pub remote_root_path: String,
    /// Full contents of the sync tool's credential file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_blob: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Directory on the endpoint; defaults to the sync settings' local root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
}

impl SyncConfig {
    pub fn remote_root(&self) -> Result<RemoteRoot, ConfigError> {
        RemoteRoot::parse(&self.remote_root_path)
    }

    pub fn credentials(&self) -> Result<&str, ConfigError> {
        match self.credential_blob.as_deref() {
            Some(blob) if !blob.trim().is_empty() => Ok(blob),
            _ => Err(ConfigError::MissingCredentials),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync status
// ---------------------------------------------------------------------------

/// Per-endpoint sync status. Held in memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    NotConfigured,
    SetupRequired,
    Checking,
    Installing,
    Syncing,
    Ready,
    Error,
}

impl SyncStatus {
    /// A flow is currently driving this endpoint.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            SyncStatus::Checking | SyncStatus::Installing | SyncStatus::Syncing
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::NotConfigured => "not configured",
            SyncStatus::SetupRequired => "setup required",
            SyncStatus::Checking => "checking",
            SyncStatus::Installing => "installing",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Ready => "ready",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_root_parses_remote_and_path() {
        let root = RemoteRoot::parse("drive1:/per/testing/t1").expect("parse");
        assert_eq!(root.remote, "drive1");
        assert_eq!(root.path, "/per/testing/t1");
        assert_eq!(root.to_string(), "drive1:/per/testing/t1");
        assert_eq!(root.remote_spec(), "drive1:");
    }

    #[test]
    fn remote_root_rejects_root_and_malformed_values() {
        for value in ["drive1:", "drive1:/", "drive1:///", "nocolon", ":path", "a/b:c"] {
            assert!(
                RemoteRoot::parse(value).is_err(),
                "'{value}' should be rejected"
            );
        }
    }

    #[test]
    fn command_result_success_follows_exit_code() {
        assert!(CommandResult::from_exit("", 0).success);
        let failed = CommandResult::from_exit("boom\n", 2);
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(2));
        assert_eq!(failed.describe(), "boom");
    }

    #[test]
    fn describe_falls_back_to_exit_code() {
        let failed = CommandResult::from_exit("\n\n", 7);
        assert_eq!(failed.describe(), "command exited with status 7");
    }

    #[test]
    fn sync_status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&SyncStatus::SetupRequired).expect("serialize");
        assert_eq!(json, "\"SETUP_REQUIRED\"");
        assert!(SyncStatus::Syncing.is_transient());
        assert!(!SyncStatus::Ready.is_transient());
    }

    #[test]
    fn missing_or_blank_credentials_are_rejected() {
        let mut config = SyncConfig {
            remote_root_path: "gdrive:/work".to_string(),
            credential_blob: None,
            enabled: true,
            local_root_path: None,
            last_sync_timestamp: None,
        };
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::MissingCredentials)
        ));
        config.credential_blob = Some("  \n".to_string());
        assert!(config.credentials().is_err());
        config.credential_blob = Some("[gdrive]\ntype = drive\n".to_string());
        assert!(config.credentials().is_ok());
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let endpoint = EndpointDescriptor {
            id: EndpointId::from("e1"),
            address: "ws://localhost".to_string(),
            token: "t".to_string(),
            expires_at: Some(now),
        };
        assert!(endpoint.is_expired_at(now));
    }
}
