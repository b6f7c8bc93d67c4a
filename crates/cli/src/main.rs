//! `bbr` -- back up and restore a deployment through its jobs' lifecycle
//! scripts.
//!
//! ```text
//! bbr deployment --deployment <name> backup [--artifact-path <dir>] [--with-manifest]
//! bbr deployment --deployment <name> restore --artifact-path <dir>
//! bbr deployment --deployment <name> pre-backup-check
//! bbr deployment --deployment <name> backup-cleanup
//! bbr deployment --deployment <name> restore-cleanup
//! ```
//!
//! Connection settings come from the environment (see [`config`]), after
//! loading a `.env` file if present. The exit code is the bitmask of
//! failed stages: 1 operation, 4 lock, 8 unlock, 16 cleanup.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bbr_core::run_result::RunReport;
use bbr_orchestrator::{
    BackupOptions, CancellationController, LogSink, Orchestrator, OrchestratorConfig,
    RestoreOptions,
};
use bbr_remote::director::HttpDirectorClient;
use bbr_remote::ssh::SshSessionProvider;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "bbr")]
#[command(about = "Back up and restore deployments")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Subcommand)]
enum TopCommand {
    /// Operate on a single deployment
    Deployment {
        /// Name of the deployment
        #[arg(short, long, env = "BBR_DEPLOYMENT")]
        deployment: String,

        #[command(subcommand)]
        command: DeploymentCommand,
    },
}

#[derive(Subcommand)]
enum DeploymentCommand {
    /// Back up the deployment
    Backup {
        /// Directory the backup is written into
        #[arg(long, default_value = ".")]
        artifact_path: PathBuf,

        /// Also store the deployment manifest
        #[arg(long)]
        with_manifest: bool,
    },

    /// Restore the deployment from a backup
    Restore {
        /// Backup directory to restore from
        #[arg(long)]
        artifact_path: PathBuf,
    },

    /// Check that the deployment can be backed up
    PreBackupCheck,

    /// Clean up after a backup that was interrupted
    BackupCleanup,

    /// Clean up after a restore that was interrupted
    RestoreCleanup,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let sink = LogSink::stderr();
    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bbr={level}").into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(sink.clone()),
        )
        .init();

    let TopCommand::Deployment {
        deployment,
        command,
    } = cli.command;

    let code = match run(&deployment, command, sink).await {
        Ok(report) => finish(report),
        Err(err) => {
            eprintln!("{err:#}");
            write_side_log(&format!("{err:?}"));
            1
        }
    };
    std::process::exit(code);
}

async fn run(
    deployment: &str,
    command: DeploymentCommand,
    sink: LogSink,
) -> anyhow::Result<RunReport> {
    let orchestrator = build_orchestrator().await?;

    match command {
        DeploymentCommand::Backup {
            artifact_path,
            with_manifest,
        } => {
            let options = BackupOptions {
                artifact_parent: artifact_path,
                with_manifest,
            };
            let controller = CancellationController::new(sink);
            let checkpoint = controller.checkpoint();
            let input = tokio::io::BufReader::new(tokio::io::stdin());

            let outcome = controller
                .supervise(
                    orchestrator.backup(deployment, &options, &checkpoint),
                    interrupted(),
                    input,
                )
                .await?;
            if let Some(path) = &outcome.artifact_path {
                println!("Backup created in {}", path.display());
            }
            Ok(outcome.report)
        }
        DeploymentCommand::Restore { artifact_path } => {
            let options = RestoreOptions { artifact_path };
            Ok(orchestrator.restore(deployment, &options).await?)
        }
        DeploymentCommand::PreBackupCheck => match orchestrator.pre_backup_check(deployment).await {
            Ok(()) => {
                println!("Deployment '{deployment}' can be backed up.");
                Ok(RunReport::default())
            }
            Err(err) => {
                println!("Deployment '{deployment}' cannot be backed up.");
                Err(err.into())
            }
        },
        DeploymentCommand::BackupCleanup => Ok(orchestrator.backup_cleanup(deployment).await?),
        DeploymentCommand::RestoreCleanup => Ok(orchestrator.restore_cleanup(deployment).await?),
    }
}

async fn build_orchestrator() -> anyhow::Result<Orchestrator> {
    let cli_config = CliConfig::from_env()?;
    let config = OrchestratorConfig::from_env()?;

    let ca_cert = match &cli_config.director.ca_cert {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("reading CA certificate {}", path.display()))?,
        ),
        None => None,
    };
    let director = HttpDirectorClient::new(
        &cli_config.director.url,
        &cli_config.director.username,
        &cli_config.director.password,
        ca_cert.as_deref(),
    )?;
    let sessions = SshSessionProvider::new(cli_config.ssh);

    tracing::debug!(
        director = %cli_config.director.url,
        max_parallel_instances = config.max_parallel_instances,
        "Configuration loaded",
    );
    Ok(Orchestrator::new(
        Arc::new(director),
        Arc::new(sessions),
        config,
    ))
}

/// Resolves on the first Ctrl-C. Never resolves if the handler cannot be
/// installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::debug!(error = %err, "Cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
}

/// Print the outcome of a run and turn it into an exit code.
fn finish(report: RunReport) -> i32 {
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }
    if !report.is_success() {
        eprintln!("{}", report.error_message());
        write_side_log(&format!("{:#?}", report.failures));
    }
    report.exit_code()
}

/// Write `details` to `bbr-<timestamp>.err.log` in the working directory.
fn write_side_log(details: &str) {
    let name = format!("bbr-{}.err.log", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    let path = Path::new(&name);
    match std::fs::write(path, details) {
        Ok(()) => eprintln!("Error details written to {}", path.display()),
        Err(err) => tracing::debug!(error = %err, "Failed to write error log"),
    }
}
