//! Remote-side locations and sync tool flags.

/// Where things live on the endpoint and how the sync tool is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub tool: String,
    pub install_command: String,
    /// rclone config file on the endpoint.
    pub credential_path: String,
    /// rclone's bisync working directory on the endpoint.
    pub bisync_cache_dir: String,
    /// Default local side of the pair when the configuration names none.
    pub local_root: String,
    /// File `--check-access` looks for on both sides.
    pub access_check_file: String,
    pub max_lock: String,
    pub conflict_resolve: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tool: "rclone".to_string(),
            install_command: "curl -fsSL https://rclone.org/install.sh | bash".to_string(),
            credential_path: "/root/.config/rclone/rclone.conf".to_string(),
            bisync_cache_dir: "/root/.cache/rclone/bisync".to_string(),
            local_root: "/content/drive".to_string(),
            access_check_file: "RCLONE_TEST".to_string(),
            max_lock: "2m".to_string(),
            conflict_resolve: "newer".to_string(),
        }
    }
}

impl SyncSettings {
    /// Listing rclone writes for path1 of the pair named `state_id`.
    pub fn state_listing_path(&self, state_id: &str) -> String {
        format!(
            "{}/{}.path1.lst",
            self.bisync_cache_dir.trim_end_matches('/'),
            state_id
        )
    }
}
