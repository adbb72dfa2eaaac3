mod config;
mod error;
mod reconcile;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vf_infra::fleet::validate_fleet;

use crate::config::{AppConfig, Cli};
use crate::error::AppError;
use crate::reconcile::{ReconcileReport, reconcile};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Loads .env before reading the environment
    let config = AppConfig::from_env(Cli::parse());

    init_tracing(config.verbose);

    match run(&config).await {
        Ok(report) if report.is_success() => {
            tracing::info!(
                created = report.created_count(),
                skipped = report.skipped.len(),
                "completed successfully"
            );
            ExitCode::SUCCESS
        }
        Ok(report) => {
            let failed: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.machine, f.error))
                .collect();
            tracing::error!(
                created = report.created_count(),
                failed = ?failed,
                "some machines failed to start"
            );
            tracing::debug!("exiting with non-zero exit code due to errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "reconciliation aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_file(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stdout)
        .init();
}

async fn run(config: &AppConfig) -> Result<ReconcileReport, AppError> {
    let machines = config.machines()?;
    validate_fleet(&machines)?;
    tracing::debug!(machines = ?machines, "ensuring that expected machines are started");

    // Connection is closed when `hv` drops, on every return path.
    let hv = vf_infra::connect(&config.libvirt_uri)?;
    tracing::debug!(uri = hv.uri(), "listing domains");

    Ok(reconcile(hv.as_ref(), &machines).await?)
}
