//! Persisted sync configuration.
//!
//! The configuration is read and written as one blob; there is no
//! field-level merging. [`FileConfigStore`] keeps it as a JSON document:
//!
//! ```text
//! <path>        (mode 0600)
//! <path>.tmp    (transient, renamed over <path> on save)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{io_err, ConfigError};
use crate::types::SyncConfig;

/// Storage for the workspace's [`SyncConfig`].
pub trait ConfigStore: Send + Sync {
    /// Returns `None` when nothing has been configured yet.
    fn load(&self) -> Result<Option<SyncConfig>, ConfigError>;

    /// Replace the stored configuration.
    fn save(&self, config: &SyncConfig) -> Result<(), ConfigError>;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON file store with atomic replace-on-save.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<SyncConfig>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Write flow: serialize → `<name>.tmp` sibling → `chmod 0600` → `rename`.
    fn save(&self, config: &SyncConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, for embedders that keep secrets elsewhere.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    inner: Mutex<Option<SyncConfig>>,
}

impl MemoryConfigStore {
    pub fn new(config: Option<SyncConfig>) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Option<SyncConfig>, ConfigError> {
        let guard = self.inner.lock().map_err(|_| ConfigError::Poisoned)?;
        Ok(guard.clone())
    }

    fn save(&self, config: &SyncConfig) -> Result<(), ConfigError> {
        let mut guard = self.inner.lock().map_err(|_| ConfigError::Poisoned)?;
        *guard = Some(config.clone());
        Ok(())
    }
}
