//! `upload`, `list` and `fetch` commands
//!
//! Results are printed as JSON. A failed operation is reported in the
//! `status` field, not through the exit code.

use crate::artifacts::{fetch_remote_artifact, list_artifacts, upload_artifact};
use crate::bootstrap::{EnvSecrets, SecretSource};
use crate::config::DeploymentConfig;
use crate::volume::ArtifactCategory;
use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Subcommand, Clone)]
pub enum ArtifactCommands {
    /// Copy a local file into a model directory on the volume
    Upload {
        path: PathBuf,

        #[clap(long, value_enum, default_value_t = ArtifactCategory::Lora)]
        category: ArtifactCategory,
    },

    /// List model files in a directory on the volume
    #[clap(alias = "ls")]
    List {
        #[clap(long, value_enum, default_value_t = ArtifactCategory::Lora)]
        category: ArtifactCategory,
    },

    /// Download a remote file into a model directory on the volume
    Fetch {
        url: String,

        /// Destination file name
        name: String,

        #[clap(long, value_enum, default_value_t = ArtifactCategory::StableDiffusion)]
        category: ArtifactCategory,

        /// Environment variable holding a bearer token for the request
        #[clap(long)]
        token_env: Option<String>,
    },
}

/// Handle artifact commands
pub async fn handle_artifact_command(cmd: ArtifactCommands, config: &DeploymentConfig) -> Result<i32> {
    let layout = config.layout();

    match cmd {
        ArtifactCommands::Upload { path, category } => {
            print_json(&upload_artifact(&layout, &path, category))?;
        }
        ArtifactCommands::List { category } => {
            #[derive(Serialize)]
            struct Listing<'a> {
                category: ArtifactCategory,
                artifacts: &'a [crate::artifacts::ArtifactEntry],
            }

            let artifacts =
                list_artifacts(&layout, category, &config.artifacts.accepted_extensions);
            print_json(&Listing {
                category,
                artifacts: &artifacts,
            })?;
        }
        ArtifactCommands::Fetch {
            url,
            name,
            category,
            token_env,
        } => {
            let token = token_env.as_deref().and_then(|env| EnvSecrets.secret(env));
            let result =
                fetch_remote_artifact(&layout, &url, &name, category, token.as_deref()).await;
            print_json(&result)?;
        }
    }

    Ok(0)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode result")?;
    println!("{json}");
    Ok(())
}
