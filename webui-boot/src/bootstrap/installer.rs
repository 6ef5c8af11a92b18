//! Runtime install of extensions and models missing from the volume
//!
//! Each item is fetched independently; a failure is recorded and the next
//! item is attempted.

use crate::artifacts::{FetchResult, fetch_remote_artifact};
use crate::bootstrap::credentials::SecretSource;
use crate::bootstrap::report::{Step, StepOutcome};
use crate::config::{ExtensionSpec, ModelSpec};
use crate::volume::VolumeLayout;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Retrieves one extension into its destination directory
pub trait ExtensionFetcher: Send + Sync {
    fn fetch(&self, spec: &ExtensionSpec, dest: &Path) -> Result<()>;
}

/// Shallow `git clone` of the extension repository
#[derive(Debug, Default, Clone, Copy)]
pub struct GitFetcher;

impl ExtensionFetcher for GitFetcher {
    fn fetch(&self, spec: &ExtensionSpec, dest: &Path) -> Result<()> {
        let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
        if let Some(reference) = &spec.reference {
            args.push("--branch".to_string());
            args.push(reference.clone());
        }
        args.push(spec.repo.clone());
        args.push(dest.to_string_lossy().into_owned());

        let output = duct::cmd("git", &args)
            .stdout_null()
            .stderr_capture()
            .unchecked()
            .run()
            .with_context(|| format!("Failed to execute: git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git clone failed: {}", stderr.trim());
        }
        Ok(())
    }
}

/// An extension counts as installed once its directory holds anything
fn is_installed(dest: &Path) -> bool {
    fs::read_dir(dest)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Fetch every configured extension not yet present under `extensions/`
pub fn install_extensions(
    layout: &VolumeLayout,
    specs: &[ExtensionSpec],
    fetcher: &dyn ExtensionFetcher,
) -> Vec<StepOutcome> {
    let root = layout.extensions_dir();
    let mut outcomes = Vec::with_capacity(specs.len());

    for spec in specs {
        let dest = root.join(&spec.name);
        if is_installed(&dest) {
            outcomes.push(StepOutcome::skipped(Step::Extensions, &spec.name, "already installed"));
            continue;
        }

        println!("🔧 Installing extension {}...", spec.name);
        let result = fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create directory: {}", root.display()))
            .and_then(|()| fetcher.fetch(spec, &dest));

        match result {
            Ok(()) => {
                outcomes.push(StepOutcome::ok(Step::Extensions, &spec.name, "installed"));
            }
            Err(e) => {
                // Destination was empty before the fetch; drop any partial clone
                if dest.exists() {
                    let _ = fs::remove_dir_all(&dest);
                }
                outcomes.push(StepOutcome::failed(Step::Extensions, &spec.name, format!("{e:#}")));
            }
        }
    }

    outcomes
}

/// Download every configured model not yet present in its category
pub async fn install_models(
    layout: &VolumeLayout,
    specs: &[ModelSpec],
    secrets: &dyn SecretSource,
) -> Vec<StepOutcome> {
    let mut outcomes = Vec::with_capacity(specs.len());

    for spec in specs {
        let dest = layout.category_dir(spec.category).join(&spec.name);
        if dest.is_file() {
            outcomes.push(StepOutcome::skipped(Step::Models, &spec.name, "already present"));
            continue;
        }

        println!("⬇️  Downloading model {}...", spec.name);
        let token = spec.token_env.as_deref().and_then(|env| secrets.secret(env));
        let outcome = match fetch_remote_artifact(
            layout,
            &spec.url,
            &spec.name,
            spec.category,
            token.as_deref(),
        )
        .await
        {
            FetchResult::Success { size, .. } => {
                StepOutcome::ok(Step::Models, &spec.name, format!("downloaded {size} bytes"))
            }
            FetchResult::Error { message } => StepOutcome::failed(Step::Models, &spec.name, message),
        };
        outcomes.push(outcome);
    }

    outcomes
}
