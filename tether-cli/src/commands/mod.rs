pub mod exec;
pub mod flow;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use tether_core::{EndpointDescriptor, FileConfigStore};
use tether_exec::{Executor, ExecutorSettings};
use tether_sync::{StorageIntegration, SyncSettings};

/// One endpoint's executor plus the sync integration bound to a config file.
pub struct Session {
    pub executor: Executor,
    pub integration: StorageIntegration,
}

impl Session {
    pub fn open(endpoint: &Path, config: PathBuf, settings: ExecutorSettings) -> Result<Self> {
        let raw = fs::read_to_string(endpoint)
            .with_context(|| format!("failed to read endpoint descriptor {}", endpoint.display()))?;
        let descriptor: EndpointDescriptor = serde_json::from_str(&raw)
            .with_context(|| format!("invalid endpoint descriptor {}", endpoint.display()))?;

        let store = Arc::new(FileConfigStore::new(config));
        Ok(Self {
            executor: Executor::websocket(descriptor, settings),
            integration: StorageIntegration::new(store, SyncSettings::default()),
        })
    }

    pub async fn close(self) {
        self.executor.dispose().await;
    }
}
