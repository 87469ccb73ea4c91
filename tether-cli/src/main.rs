//! Tether: run commands and drive storage sync on a remote endpoint.
//!
//! # Usage
//!
//! ```text
//! tether --endpoint <descriptor.json> --config <sync.json> exec <cmd>...
//! tether --endpoint <descriptor.json> --config <sync.json> setup
//! tether --endpoint <descriptor.json> --config <sync.json> sync
//! tether --endpoint <descriptor.json> --config <sync.json> validate
//! tether --endpoint <descriptor.json> --config <sync.json> status [--json]
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{exec::ExecArgs, flow::StatusArgs, Session};
use tether_exec::ExecutorSettings;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Run commands and sync storage on a remote compute endpoint",
    long_about = None,
)]
struct Cli {
    /// JSON endpoint descriptor (`id`, `address`, `token`, optional `expires_at`).
    #[arg(long, global = true, value_name = "FILE")]
    endpoint: Option<PathBuf>,

    /// JSON sync configuration; created on first save.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to wait for the terminal channel to open.
    #[arg(long, global = true, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Seconds to wait for a command's completion marker.
    #[arg(long, global = true, value_name = "SECS")]
    command_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one shell command and print its output.
    Exec(ExecArgs),

    /// Install the sync tool, upload credentials and run the first resync.
    Setup,

    /// Run one incremental sync (sets the endpoint up first if needed).
    Sync,

    /// Check tool, credentials and remotes without changing anything.
    Validate,

    /// Derive and print the endpoint's sync status.
    Status(StatusArgs),
}

impl Cli {
    fn executor_settings(&self) -> ExecutorSettings {
        let mut settings = ExecutorSettings::default();
        if let Some(secs) = self.connect_timeout {
            settings.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.command_timeout {
            settings.command_timeout = Duration::from_secs(secs);
        }
        settings
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let endpoint = cli
        .endpoint
        .as_deref()
        .context("--endpoint <FILE> is required")?;
    let config = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("tether-sync.json"));
    let session = Session::open(endpoint, config, cli.executor_settings())?;

    let code = match cli.command {
        Commands::Exec(args) => args.run(&session).await,
        Commands::Setup => commands::flow::setup(&session).await,
        Commands::Sync => commands::flow::sync(&session).await,
        Commands::Validate => commands::flow::validate(&session).await,
        Commands::Status(args) => args.run(&session).await,
    };
    session.close().await;
    code
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
