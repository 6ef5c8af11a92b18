//! `serve` and `prepare` commands

use crate::bootstrap::{Bootstrapper, bootstrap_and_run, print_report};
use crate::config::DeploymentConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use tokio::signal;

#[derive(Debug, Subcommand, Clone)]
pub enum ServeCommands {
    /// Bootstrap the volume and run the web server until it exits
    #[clap(alias = "run")]
    Serve,

    /// Bootstrap the volume without launching the web server
    Prepare,
}

/// Handle serve commands
pub async fn handle_serve_command(cmd: ServeCommands, config: DeploymentConfig) -> Result<i32> {
    match cmd {
        ServeCommands::Serve => serve(config).await,
        ServeCommands::Prepare => prepare(config).await,
    }
}

async fn serve(config: DeploymentConfig) -> Result<i32> {
    let shutdown = async {
        if let Err(err) = shutdown_signal().await {
            tracing::warn!("signal listener error: {err}");
            std::future::pending::<()>().await;
        }
    };

    let exit = bootstrap_and_run(config, shutdown)
        .await
        .context("Web UI failed to start")?;

    println!("🛑 Web UI stopped ({exit:?})");
    Ok(exit.code())
}

async fn prepare(config: DeploymentConfig) -> Result<i32> {
    let mut bootstrapper = Bootstrapper::new(config);
    let report = bootstrapper
        .prepare()
        .await
        .context("Failed to bootstrap volume")?;

    print_report(&report);
    println!();
    println!("📄 Report written to: {}", bootstrapper.layout().report_path().display());
    Ok(0)
}

/// Resolves on ctrl-c or SIGTERM from the platform
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}
