//! Tether core library: domain types, sync-state naming, persisted configuration.
//!
//! - [`types`]: endpoint descriptors, command results, sync configuration and status
//! - [`naming`]: deterministic bisync state identifiers
//! - [`config`]: [`ConfigStore`] and its file / in-memory implementations
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

pub use config::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use error::ConfigError;
pub use naming::{sanitize, state_identifier};
pub use types::{
    CommandResult, EndpointDescriptor, EndpointId, RemoteRoot, SyncConfig, SyncPair, SyncStatus,
};
