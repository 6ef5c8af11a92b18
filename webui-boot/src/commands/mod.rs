//! Command-line surface invoked by the process supervisor

pub mod artifacts;
pub mod serve;

use crate::config::DeploymentConfig;
use crate::image::render_build_steps;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use artifacts::{ArtifactCommands, handle_artifact_command};
pub use serve::{ServeCommands, handle_serve_command};

#[derive(Debug, Parser)]
#[clap(name = "webui-boot", version, about)]
pub struct Cli {
    /// Deployment config (TOML); created with defaults if missing
    #[clap(short, long, env = "WEBUI_BOOT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the volume mount point
    #[clap(long, env = "WEBUI_BOOT_VOLUME", global = true)]
    pub volume: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    #[clap(flatten)]
    Serve(ServeCommands),

    #[clap(flatten)]
    Artifacts(ArtifactCommands),

    /// Print the ordered image build steps as JSON
    ImageSteps,
}

impl Cli {
    pub fn load_config(&self) -> Result<DeploymentConfig> {
        let mut config = DeploymentConfig::load(self.config.as_deref())?;
        if let Some(volume) = &self.volume {
            config.volume_root.clone_from(volume);
        }
        Ok(config)
    }
}

/// Dispatch a parsed command line; returns the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let config = cli.load_config()?;

    match cli.command {
        Commands::Serve(cmd) => handle_serve_command(cmd, config).await,
        Commands::Artifacts(cmd) => handle_artifact_command(cmd, &config).await,
        Commands::ImageSteps => {
            let plan = render_build_steps(&config.image, &config.seed_path());
            let json = serde_json::to_string_pretty(&plan).context("Failed to encode build plan")?;
            println!("{json}");
            Ok(0)
        }
    }
}
