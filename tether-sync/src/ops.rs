//! Atomic operations.
//!
//! Every function here issues exactly one command through the executor,
//! except the composites (`upload_credential_blob`, `perform_initial_resync`,
//! `perform_incremental_sync`, `validate_setup`, `check_if_setup`), which
//! chain single commands and stop at the first failure. Multi-line scripts
//! are never sent: only the final statement's marker would be observed.
//!
//! Protocol errors always propagate, except from the boolean probes
//! (`is_tool_installed`, `remote_path_exists`, `credential_file_exists`),
//! which log a warning and report `false`.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::Serialize;

use tether_core::{CommandResult, SyncPair};
use tether_exec::framing::shell_quote;
use tether_exec::{ExecError, Executor};

use crate::error::SyncError;
use crate::settings::SyncSettings;

/// rclone's installer exits with this status when the latest version is
/// already present.
const INSTALLER_ALREADY_CURRENT: i32 = 3;

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bv?(\d+\.\d+(?:\.\d+)?)\b").expect("version pattern is valid")
});

static REMOTE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9_.+@ -]*):$").expect("remote pattern is valid")
});

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// `command -v <tool>`; absence is an answer, not an error.
pub async fn is_tool_installed(executor: &Executor, settings: &SyncSettings) -> bool {
    probe(executor, "command -v", &[&settings.tool]).await
}

/// First version token printed by `<tool> version`, if any.
pub async fn get_tool_version(
    executor: &Executor,
    settings: &SyncSettings,
) -> Result<Option<String>, ExecError> {
    let result = executor
        .execute(&format!("{} version", settings.tool), &[])
        .await?;
    if !result.success {
        return Ok(None);
    }
    Ok(parse_version(&result.output))
}

pub fn parse_version(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| !line.contains(":exit="))
        .find_map(|line| VERSION.captures(line))
        .map(|caps| caps[1].to_string())
}

/// Install the sync tool. Without `force_reinstall`, an installed tool is
/// left alone. Never retries.
pub async fn install_tool(
    executor: &Executor,
    settings: &SyncSettings,
    force_reinstall: bool,
) -> Result<CommandResult, ExecError> {
    if !force_reinstall && is_tool_installed(executor, settings).await {
        return Ok(CommandResult::ok(format!("{} already installed", settings.tool)));
    }
    tracing::info!(endpoint = %executor.endpoint_id(), force_reinstall, "installing sync tool");
    let mut result = executor.execute(&settings.install_command, &[]).await?;
    if result.exit_code == Some(INSTALLER_ALREADY_CURRENT) {
        result.success = true;
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Write `content` to `path` with mode 0600: create the directory, write the
/// base64-transported content, then chmod. Stops at the first failed step.
pub async fn upload_credential_blob(
    executor: &Executor,
    content: &str,
    path: &str,
) -> Result<CommandResult, ExecError> {
    let dir = parent_dir(path);
    let mkdir = executor.execute("mkdir -p", &[dir]).await?;
    if !mkdir.success {
        return Ok(mkdir.with_error(format!("could not create {dir}")));
    }

    let encoded = STANDARD.encode(content.as_bytes());
    let write_line = format!(
        "printf '%s' {} | base64 -d > {}",
        shell_quote(&encoded),
        shell_quote(path)
    );
    let write = executor.execute(&write_line, &[]).await?;
    if !write.success {
        return Ok(write.with_error(format!("could not write {path}")));
    }

    let chmod = executor.execute("chmod 600", &[path]).await?;
    if !chmod.success {
        return Ok(chmod.with_error(format!("could not restrict permissions on {path}")));
    }
    Ok(chmod)
}

pub async fn credential_file_exists(executor: &Executor, path: &str) -> bool {
    probe(executor, "test -f", &[path]).await
}

// ---------------------------------------------------------------------------
// Remotes and directories
// ---------------------------------------------------------------------------

/// Remote names from `<tool> listremotes`, without the trailing `:`.
pub async fn list_configured_remotes(
    executor: &Executor,
    settings: &SyncSettings,
) -> Result<Vec<String>, ExecError> {
    let result = executor
        .execute(&format!("{} listremotes", settings.tool), &[])
        .await?;
    if !result.success {
        return Ok(Vec::new());
    }
    Ok(parse_remotes(&result.output))
}

pub fn parse_remotes(output: &str) -> Vec<String> {
    let mut remotes: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter_map(|line| REMOTE_LINE.captures(line))
        .map(|caps| caps[1].to_string())
        .collect();
    remotes.dedup();
    remotes
}

/// Whether the remote answers a top-level listing.
pub async fn is_remote_accessible(
    executor: &Executor,
    settings: &SyncSettings,
    remote_name: &str,
) -> Result<bool, ExecError> {
    let remote = format!("{}:", remote_name.trim_end_matches(':'));
    let result = executor
        .execute(
            &format!("{} lsd", settings.tool),
            &[&remote, "--max-depth", "1"],
        )
        .await?;
    Ok(result.success)
}

/// `path` is a full `<remote>:<path>` location.
pub async fn remote_path_exists(executor: &Executor, settings: &SyncSettings, path: &str) -> bool {
    probe(
        executor,
        &format!("{} lsf", settings.tool),
        &[path, "--max-depth", "1"],
    )
    .await
}

pub async fn create_remote_directory(
    executor: &Executor,
    settings: &SyncSettings,
    path: &str,
) -> Result<CommandResult, ExecError> {
    executor
        .execute(&format!("{} mkdir", settings.tool), &[path])
        .await
}

pub async fn create_local_directory(
    executor: &Executor,
    path: &str,
) -> Result<CommandResult, ExecError> {
    executor.execute("mkdir -p", &[path]).await
}

/// Create the `--check-access` marker file at the remote root of the pair.
pub async fn create_access_check_file(
    executor: &Executor,
    settings: &SyncSettings,
    pair: &SyncPair,
) -> Result<CommandResult, ExecError> {
    let target = format!(
        "{}/{}",
        pair.remote.to_string().trim_end_matches('/'),
        settings.access_check_file
    );
    executor
        .execute(&format!("{} touch", settings.tool), &[&target])
        .await
}

// ---------------------------------------------------------------------------
// Bisync
// ---------------------------------------------------------------------------

/// Whether bisync listings exist for the identifier `state_id`.
pub async fn sync_state_exists(
    executor: &Executor,
    settings: &SyncSettings,
    state_id: &str,
) -> Result<bool, ExecError> {
    let result = executor
        .execute("test -f", &[&settings.state_listing_path(state_id)])
        .await?;
    Ok(result.success)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BisyncMode {
    ResyncDryRun,
    Resync,
    Incremental,
}

fn bisync_args(settings: &SyncSettings, pair: &SyncPair, mode: BisyncMode) -> Vec<String> {
    let mut args = vec![pair.local.clone(), pair.remote.to_string()];
    let flags: &[&str] = match mode {
        BisyncMode::ResyncDryRun => &["--resync", "--resync-mode", "path2", "--dry-run"],
        BisyncMode::Resync => &["--resync", "--resync-mode", "path2"],
        BisyncMode::Incremental => &["--check-access", "--recover"],
    };
    args.extend(flags.iter().map(|f| f.to_string()));
    args.extend(
        ["--create-empty-src-dirs", "--resilient", "--max-lock"]
            .iter()
            .map(|f| f.to_string()),
    );
    args.push(settings.max_lock.clone());
    if mode == BisyncMode::Incremental {
        args.push("--conflict-resolve".to_string());
        args.push(settings.conflict_resolve.clone());
    }
    args
}

async fn run_bisync(
    executor: &Executor,
    settings: &SyncSettings,
    pair: &SyncPair,
    mode: BisyncMode,
) -> Result<CommandResult, ExecError> {
    let args = bisync_args(settings, pair, mode);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    executor
        .execute(&format!("{} bisync", settings.tool), &args)
        .await
}

/// Establish baseline state for `pair`, trusting the remote side.
///
/// remote accessible → remote dir → local dir → access-check file →
/// dry-run resync → resync. Returns the first failed step's result, or the
/// final resync's. Nothing is cleaned up on failure.
pub async fn perform_initial_resync(
    executor: &Executor,
    settings: &SyncSettings,
    pair: &SyncPair,
) -> Result<CommandResult, ExecError> {
    let remote = &pair.remote.remote;
    if !is_remote_accessible(executor, settings, remote).await? {
        return Ok(CommandResult::failure(format!(
            "remote '{remote}' is not accessible"
        )));
    }

    let remote_dir = create_remote_directory(executor, settings, &pair.remote.to_string()).await?;
    if !remote_dir.success {
        return Ok(remote_dir.with_error(format!("could not create {}", pair.remote)));
    }

    let local_dir = create_local_directory(executor, &pair.local).await?;
    if !local_dir.success {
        return Ok(local_dir.with_error(format!("could not create {}", pair.local)));
    }

    let access = create_access_check_file(executor, settings, pair).await?;
    if !access.success {
        return Ok(access.with_error("could not create access-check file"));
    }

    let dry_run = run_bisync(executor, settings, pair, BisyncMode::ResyncDryRun).await?;
    if !dry_run.success {
        let message = format!("resync dry run failed: {}", dry_run.describe());
        return Ok(dry_run.with_error(message));
    }

    tracing::info!(endpoint = %executor.endpoint_id(), state_id = %pair.state_id(), "running resync");
    run_bisync(executor, settings, pair, BisyncMode::Resync).await
}

/// One change-only pass, or a full resync when no baseline exists yet.
///
/// Listings under the reversed path order mean some caller computed the
/// identifier with the sides swapped; that is reported instead of silently
/// resyncing over it.
pub async fn perform_incremental_sync(
    executor: &Executor,
    settings: &SyncSettings,
    pair: &SyncPair,
) -> Result<CommandResult, SyncError> {
    let state_id = pair.state_id();
    if !sync_state_exists(executor, settings, &state_id).await? {
        let reversed = pair.reversed_state_id();
        if sync_state_exists(executor, settings, &reversed).await? {
            return Err(SyncError::Validation(format!(
                "bisync state exists as '{reversed}' (remote as path1) but this system \
                 uses local as path1 ('{state_id}'); refusing to resync"
            )));
        }
        tracing::info!(endpoint = %executor.endpoint_id(), %state_id, "no bisync state; falling back to resync");
        return Ok(perform_initial_resync(executor, settings, pair).await?);
    }

    Ok(run_bisync(executor, settings, pair, BisyncMode::Incremental).await?)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Read-only view of the endpoint's sync setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub tool_installed: bool,
    pub credentials_present: bool,
    pub remotes: Vec<String>,
    pub valid: bool,
    pub message: String,
}

/// Tool installed? credential file present? any remote configured?
/// Only presence and listing commands are issued.
pub async fn validate_setup(
    executor: &Executor,
    settings: &SyncSettings,
) -> Result<SetupReport, ExecError> {
    let tool_installed = is_tool_installed(executor, settings).await;
    let credentials_present = credential_file_exists(executor, &settings.credential_path).await;
    let remotes = if tool_installed {
        list_configured_remotes(executor, settings).await?
    } else {
        Vec::new()
    };

    let mut problems = Vec::new();
    if !tool_installed {
        problems.push(format!("{} is not installed", settings.tool));
    }
    if !credentials_present {
        problems.push(format!("{} is missing", settings.credential_path));
    }
    if tool_installed && remotes.is_empty() {
        problems.push("no remotes configured".to_string());
    }

    let valid = problems.is_empty();
    let message = if valid {
        format!(
            "{} installed; {} remote(s) configured: {}",
            settings.tool,
            remotes.len(),
            remotes.join(", ")
        )
    } else {
        problems.join("; ")
    };
    Ok(SetupReport {
        tool_installed,
        credentials_present,
        remotes,
        valid,
        message,
    })
}

/// Cheap "already set up" probe: tool installed and credential file present.
pub async fn check_if_setup(executor: &Executor, settings: &SyncSettings) -> bool {
    is_tool_installed(executor, settings).await
        && credential_file_exists(executor, &settings.credential_path).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn probe(executor: &Executor, program: &str, args: &[&str]) -> bool {
    match executor.execute(program, args).await {
        Ok(result) => result.success,
        Err(err) => {
            tracing::warn!(
                endpoint = %executor.endpoint_id(),
                probe = program,
                error = %err,
                "probe failed; treating as absent",
            );
            false
        }
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}
