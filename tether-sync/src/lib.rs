//! # tether-sync
//!
//! rclone-backed storage sync for a remote endpoint, built entirely from
//! single commands run through a [`tether_exec::Executor`].
//!
//! [`ops`] holds the atomic operations; [`StorageIntegration`] tracks
//! per-endpoint [`tether_core::SyncStatus`] and drives setup and sync flows.

pub mod error;
pub mod integration;
pub mod ops;
pub mod settings;

pub use error::SyncError;
pub use integration::{StatusEvent, StorageIntegration, SyncOutcome};
pub use ops::SetupReport;
pub use settings::SyncSettings;
