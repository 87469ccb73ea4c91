//! `tether setup | sync | validate | status`.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use tether_core::{EndpointId, SyncStatus};
use tether_sync::SyncOutcome;

use super::Session;

pub async fn setup(session: &Session) -> Result<ExitCode> {
    let outcome = session.integration.setup_on_server(&session.executor).await;
    Ok(report(&outcome))
}

/// Status is not persisted between invocations, so it is derived first and
/// setup runs when the endpoint is not ready yet.
pub async fn sync(session: &Session) -> Result<ExitCode> {
    let integration = &session.integration;
    let executor = &session.executor;

    integration.check_and_initialize_status(executor).await;
    if integration.status(executor.endpoint_id()).await != SyncStatus::Ready {
        let outcome = integration.setup_on_server(executor).await;
        if !outcome.success {
            return Ok(report(&outcome));
        }
    }
    Ok(report(&integration.sync_now(executor).await))
}

pub async fn validate(session: &Session) -> Result<ExitCode> {
    let outcome = session.integration.validate_setup(&session.executor).await;
    Ok(report(&outcome))
}

/// Arguments for `tether status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson<'a> {
    endpoint_id: &'a EndpointId,
    status: SyncStatus,
    #[serde(flatten)]
    outcome: &'a SyncOutcome,
}

impl StatusArgs {
    pub async fn run(self, session: &Session) -> Result<ExitCode> {
        let id = session.executor.endpoint_id();
        let outcome = session
            .integration
            .check_and_initialize_status(&session.executor)
            .await;
        let status = session.integration.status(id).await;

        if self.json {
            let json = StatusJson {
                endpoint_id: id,
                status,
                outcome: &outcome,
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        } else {
            println!("{id}: {}", paint(status));
            if let Some(detail) = outcome.message.as_deref().or(outcome.error.as_deref()) {
                println!("  {detail}");
            }
        }

        Ok(if status == SyncStatus::Error {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

fn report(outcome: &SyncOutcome) -> ExitCode {
    if outcome.success {
        println!("{} {}", "✓".green().bold(), outcome.message.as_deref().unwrap_or("done"));
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "{} {}",
            "✗".red().bold(),
            outcome.error.as_deref().unwrap_or("failed")
        );
        ExitCode::FAILURE
    }
}

fn paint(status: SyncStatus) -> String {
    let label = status.to_string();
    match status {
        SyncStatus::Ready => label.green().bold().to_string(),
        SyncStatus::Error => label.red().bold().to_string(),
        SyncStatus::NotConfigured | SyncStatus::SetupRequired => label.yellow().to_string(),
        SyncStatus::Checking | SyncStatus::Installing | SyncStatus::Syncing => {
            label.cyan().to_string()
        }
    }
}
