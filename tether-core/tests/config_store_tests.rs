use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use tether_core::{ConfigError, ConfigStore, FileConfigStore, SyncConfig};

fn sample_config() -> SyncConfig {
    SyncConfig {
        remote_root_path: "drive1:/per/testing/t1".to_string(),
        credential_blob: Some("[drive1]\ntype = drive\n".to_string()),
        enabled: true,
        local_root_path: Some("/content/abc-123".to_string()),
        last_sync_timestamp: None,
    }
}

#[test]
fn load_returns_none_when_file_missing() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileConfigStore::new(dir.path().join("sync.json"));
    assert!(store.load().expect("load").is_none());
}

#[test]
fn save_then_load_preserves_every_field() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileConfigStore::new(dir.path().join("nested").join("sync.json"));

    let mut config = sample_config();
    config.last_sync_timestamp = Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    store.save(&config).expect("save");

    let loaded = store.load().expect("load").expect("present");
    assert_eq!(loaded, config);
}

#[test]
fn save_replaces_whole_blob_and_leaves_no_tmp_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.json");
    let store = FileConfigStore::new(&path);

    store.save(&sample_config()).expect("first save");
    let mut second = sample_config();
    second.enabled = false;
    second.credential_blob = None;
    store.save(&second).expect("second save");

    let loaded = store.load().expect("load").expect("present");
    assert!(!loaded.enabled);
    assert!(loaded.credential_blob.is_none());
    assert!(!dir.path().join("sync.json.tmp").exists());
}

#[cfg(unix)]
#[test]
fn saved_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.json");
    FileConfigStore::new(&path)
        .save(&sample_config())
        .expect("save");

    let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn malformed_file_reports_parse_error_with_path() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.json");
    std::fs::write(&path, "{ not json").expect("write");

    let err = FileConfigStore::new(&path).load().unwrap_err();
    match err {
        ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn minimal_document_uses_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("sync.json");
    std::fs::write(&path, r#"{"remote_root_path":"gdrive:/x"}"#).expect("write");

    let loaded = FileConfigStore::new(&path)
        .load()
        .expect("load")
        .expect("present");
    assert!(!loaded.enabled);
    assert!(loaded.credential_blob.is_none());
    assert!(loaded.last_sync_timestamp.is_none());
}
