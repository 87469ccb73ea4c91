//! Sync state machine.
//!
//! ```text
//! NOT_CONFIGURED → {SETUP_REQUIRED | READY} → CHECKING → INSTALLING → SYNCING → READY
//!                                                  └──────────┴──────────┴──→ ERROR
//! READY ⇄ SYNCING on every sync; ERROR is left by running setup again.
//! ```
//!
//! Status lives in memory only and is re-derived from the endpoint by
//! [`StorageIntegration::check_and_initialize_status`]. Every change is
//! broadcast as a [`StatusEvent`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use tether_core::{CommandResult, ConfigStore, EndpointId, SyncConfig, SyncPair, SyncStatus};
use tether_exec::Executor;

use crate::error::SyncError;
use crate::ops;
use crate::settings::SyncSettings;

const EVENT_CAPACITY: usize = 64;

/// Status change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub endpoint_id: EndpointId,
    pub status: SyncStatus,
}

/// Result of a flow. Expected failures are reported here, not as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Per-endpoint sync orchestration over a shared configuration store.
pub struct StorageIntegration {
    store: Arc<dyn ConfigStore>,
    settings: SyncSettings,
    statuses: RwLock<HashMap<EndpointId, SyncStatus>>,
    events: broadcast::Sender<StatusEvent>,
}

impl StorageIntegration {
    pub fn new(store: Arc<dyn ConfigStore>, settings: SyncSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            settings,
            statuses: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Current status; endpoints never seen are `NotConfigured`.
    pub async fn status(&self, endpoint_id: &EndpointId) -> SyncStatus {
        self.statuses
            .read()
            .await
            .get(endpoint_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn statuses(&self) -> Vec<(EndpointId, SyncStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .read()
            .await
            .iter()
            .map(|(id, status)| (id.clone(), *status))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Re-derive status after (re)connecting to an endpoint. Endpoints that
    /// are already `READY` or mid-flow are left alone.
    pub async fn check_and_initialize_status(&self, executor: &Executor) -> SyncOutcome {
        let id = executor.endpoint_id();
        let current = self.status(id).await;
        if current == SyncStatus::Ready || current.is_transient() {
            return SyncOutcome::ok(format!("status already {current}"));
        }

        match self.enabled_config() {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.set_status(id, SyncStatus::NotConfigured).await;
                return SyncOutcome::failed("sync is not configured or not enabled");
            }
            Err(err) => return self.fail(id, err).await,
        }

        match ops::validate_setup(executor, &self.settings).await {
            Ok(report) => {
                let status = if report.valid {
                    SyncStatus::Ready
                } else {
                    SyncStatus::SetupRequired
                };
                self.set_status(id, status).await;
                SyncOutcome::ok(report.message)
            }
            Err(err) => self.fail(id, err.into()).await,
        }
    }

    /// Install the tool, upload credentials and run the first resync.
    /// Short-circuits to `READY` when the endpoint is already set up.
    pub async fn setup_on_server(&self, executor: &Executor) -> SyncOutcome {
        let id = executor.endpoint_id();
        let config = match self.enabled_config() {
            Ok(Some(config)) => config,
            Ok(None) => {
                self.set_status(id, SyncStatus::NotConfigured).await;
                return SyncOutcome::failed("sync is not configured or not enabled");
            }
            Err(err) => return self.fail(id, err).await,
        };

        match self.run_setup(executor, &config).await {
            Ok(message) => {
                self.set_status(id, SyncStatus::Ready).await;
                SyncOutcome::ok(message)
            }
            Err(err) => self.fail(id, err).await,
        }
    }

    async fn run_setup(&self, executor: &Executor, config: &SyncConfig) -> Result<String, SyncError> {
        let id = executor.endpoint_id();
        let pair = self.sync_pair(config)?;
        let credentials = config.credentials()?;

        self.set_status(id, SyncStatus::Checking).await;
        if ops::check_if_setup(executor, &self.settings).await {
            return Ok(format!("{} is already set up on {id}", self.settings.tool));
        }

        self.set_status(id, SyncStatus::Installing).await;
        let install = ops::install_tool(executor, &self.settings, false).await?;
        require("install", install)?;
        if let Some(version) = ops::get_tool_version(executor, &self.settings).await? {
            tracing::info!(endpoint = %id, %version, "sync tool installed");
        }
        let upload =
            ops::upload_credential_blob(executor, credentials, &self.settings.credential_path)
                .await?;
        require("credential upload", upload)?;

        self.set_status(id, SyncStatus::Syncing).await;
        let resync = ops::perform_initial_resync(executor, &self.settings, &pair).await?;
        require("initial resync", resync)?;

        Ok(format!("{} set up; {} ⇄ {}", id, pair.local, pair.remote))
    }

    /// One incremental sync. Requires `READY`.
    pub async fn sync_now(&self, executor: &Executor) -> SyncOutcome {
        let id = executor.endpoint_id();
        let current = self.status(id).await;
        if current != SyncStatus::Ready {
            return SyncOutcome::failed(format!(
                "sync requires a ready endpoint (status: {current}); run setup first"
            ));
        }

        let config = match self.enabled_config() {
            Ok(Some(config)) => config,
            Ok(None) => return SyncOutcome::failed("sync is not configured or not enabled"),
            Err(err) => return self.fail(id, err).await,
        };
        let pair = match self.sync_pair(&config) {
            Ok(pair) => pair,
            Err(err) => return self.fail(id, err).await,
        };

        self.set_status(id, SyncStatus::Syncing).await;
        let result = ops::perform_incremental_sync(executor, &self.settings, &pair)
            .await
            .and_then(|result| require("sync", result));
        if let Err(err) = result {
            return self.fail(id, err).await;
        }

        if let Err(err) = self.record_last_sync() {
            tracing::warn!(endpoint = %id, error = %err, "could not record last sync time");
        }
        self.set_status(id, SyncStatus::Ready).await;
        SyncOutcome::ok(format!("synced {} ⇄ {}", pair.local, pair.remote))
    }

    /// Read-only check; updates status so observers see the latest truth.
    pub async fn validate_setup(&self, executor: &Executor) -> SyncOutcome {
        let id = executor.endpoint_id();
        match ops::validate_setup(executor, &self.settings).await {
            Ok(report) => {
                let status = if report.valid {
                    SyncStatus::Ready
                } else {
                    SyncStatus::SetupRequired
                };
                if !self.status(id).await.is_transient() {
                    self.set_status(id, status).await;
                }
                if report.valid {
                    SyncOutcome::ok(report.message)
                } else {
                    SyncOutcome::failed(report.message)
                }
            }
            Err(err) => self.fail(id, err.into()).await,
        }
    }

    /// Forget an endpoint. Remote state is untouched.
    pub async fn remove_server(&self, endpoint_id: &EndpointId) {
        if self.statuses.write().await.remove(endpoint_id).is_some() {
            tracing::debug!(endpoint = %endpoint_id, "sync status dropped");
        }
    }

    fn enabled_config(&self) -> Result<Option<SyncConfig>, SyncError> {
        Ok(self.store.load()?.filter(|config| config.enabled))
    }

    fn sync_pair(&self, config: &SyncConfig) -> Result<SyncPair, SyncError> {
        let remote = config.remote_root()?;
        let local = config
            .local_root_path
            .clone()
            .unwrap_or_else(|| self.settings.local_root.clone());
        if !local.starts_with('/') || local.trim_matches('/').is_empty() {
            return Err(SyncError::Configuration(format!(
                "local root '{local}' must be an absolute directory below /"
            )));
        }
        Ok(SyncPair::new(local, remote))
    }

    fn record_last_sync(&self) -> Result<(), SyncError> {
        let Some(mut config) = self.store.load()? else {
            return Ok(());
        };
        config.last_sync_timestamp = Some(Utc::now());
        self.store.save(&config)?;
        Ok(())
    }

    async fn fail(&self, endpoint_id: &EndpointId, err: SyncError) -> SyncOutcome {
        tracing::warn!(endpoint = %endpoint_id, error = %err, "sync flow failed");
        self.set_status(endpoint_id, SyncStatus::Error).await;
        SyncOutcome::failed(err.to_string())
    }

    async fn set_status(&self, endpoint_id: &EndpointId, status: SyncStatus) {
        let mut statuses = self.statuses.write().await;
        let previous = statuses.insert(endpoint_id.clone(), status);
        if previous == Some(status) {
            return;
        }
        tracing::info!(
            endpoint = %endpoint_id,
            from = ?previous,
            to = %status,
            "sync status changed",
        );
        // No subscribers is fine.
        let _ = self.events.send(StatusEvent {
            endpoint_id: endpoint_id.clone(),
            status,
        });
    }
}

fn require(step: &'static str, result: CommandResult) -> Result<CommandResult, SyncError> {
    if result.success {
        Ok(result)
    } else {
        Err(SyncError::StepFailed {
            step,
            message: result.describe(),
        })
    }
}
