//! Volume bootstrap and web server launch
//!
//! Runs once per server start:
//! - Seed check: copy the image-baked tree into a cold volume (fatal on failure)
//! - Directory repair for model categories and extensions
//! - Credential files for configured secrets
//! - Allow-list patch of the web UI source
//! - Runtime install of missing extensions and models
//! - Launch, then block until the server exits or shutdown is requested
//!
//! Only the seed copy and the launch itself can fail the invocation; every
//! other step degrades into a `StepOutcome` on the report.
//!
//! The seed copy and extension clones block on the filesystem and on
//! `git`, so they run on tokio's blocking pool.
//!
//! Cold starts are assumed to be serialized per deployment by the platform;
//! nothing here locks the volume against a concurrent bootstrap.

pub mod credentials;
pub mod installer;
pub mod launch;
pub mod patch;
pub mod report;
pub mod seed;
pub mod skeleton;

pub use credentials::{EnvSecrets, SecretSource, materialize_credentials};
pub use installer::{ExtensionFetcher, GitFetcher, install_extensions, install_models};
pub use launch::{LaunchCommand, LaunchExit};
pub use patch::{PatchOutcome, apply_allowlist_patch};
pub use report::{BootstrapReport, Step, StepOutcome, StepStatus, generate_toon_report, print_report};
pub use seed::{SeedStatus, ensure_seeded};
pub use skeleton::{SkeletonResult, repair_directories};

use crate::config::DeploymentConfig;
use crate::error::{BootstrapError, TaskSnafu};
use crate::volume::VolumeLayout;
use chrono::Utc;
use snafu::ResultExt;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle of one bootstrap-and-launch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Marker absent; the seed tree still has to be copied
    Cold,
    Seeded,
    Configured,
    Running,
    Terminated,
}

pub struct Bootstrapper {
    config: DeploymentConfig,
    layout: VolumeLayout,
    secrets: Box<dyn SecretSource>,
    fetcher: Arc<dyn ExtensionFetcher>,
    transitions: Vec<BootstrapState>,
}

impl Bootstrapper {
    /// Bootstrapper reading secrets from the environment and cloning with git
    pub fn new(config: DeploymentConfig) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            secrets: Box::new(EnvSecrets),
            fetcher: Arc::new(GitFetcher),
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_secrets(mut self, secrets: impl SecretSource + 'static) -> Self {
        self.secrets = Box::new(secrets);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl ExtensionFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    /// Current state, if the invocation has started
    pub fn state(&self) -> Option<BootstrapState> {
        self.transitions.last().copied()
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[BootstrapState] {
        &self.transitions
    }

    fn enter(&mut self, state: BootstrapState) {
        tracing::debug!(?state, "bootstrap state");
        self.transitions.push(state);
    }

    /// Bring the volume to `CONFIGURED`
    pub async fn prepare(&mut self) -> Result<BootstrapReport, BootstrapError> {
        let cold = !self.layout.join(&self.config.marker).exists();
        if cold {
            self.enter(BootstrapState::Cold);
            println!("📦 Copying web UI to persistent volume...");
        }
        let (layout, seed_root, marker) = (
            self.layout.clone(),
            self.config.seed_path(),
            self.config.marker.clone(),
        );
        let seed = tokio::task::spawn_blocking(move || ensure_seeded(&layout, &seed_root, &marker))
            .await
            .context(TaskSnafu)??;
        self.enter(BootstrapState::Seeded);

        let config = &self.config;
        let layout = &self.layout;

        let skeleton = repair_directories(layout, &config.directories);

        let mut outcomes =
            materialize_credentials(&config.secrets, self.secrets.as_ref(), config.credential_mode);

        if let Some(spec) = &config.patch {
            let item = spec.file.display().to_string();
            outcomes.push(match apply_allowlist_patch(layout, spec) {
                Ok(PatchOutcome::Applied { added }) => {
                    StepOutcome::ok(Step::Patch, item, format!("added {}", added.join(", ")))
                }
                Ok(PatchOutcome::Unchanged) => {
                    StepOutcome::skipped(Step::Patch, item, "allow-list already complete")
                }
                Err(e) => StepOutcome::failed(Step::Patch, item, format!("{e:#}")),
            });
        }

        let (extension_layout, specs, fetcher) = (
            layout.clone(),
            config.extensions.clone(),
            Arc::clone(&self.fetcher),
        );
        outcomes.extend(
            tokio::task::spawn_blocking(move || {
                install_extensions(&extension_layout, &specs, fetcher.as_ref())
            })
            .await
            .unwrap_or_else(|e| {
                vec![StepOutcome::failed(
                    Step::Extensions,
                    "extensions",
                    format!("install task did not complete: {e}"),
                )]
            }),
        );
        outcomes.extend(install_models(layout, &config.models, self.secrets.as_ref()).await);

        let report = BootstrapReport {
            timestamp: Utc::now().to_rfc3339(),
            seed,
            skeleton,
            outcomes,
        };

        if let Err(e) = generate_toon_report(&report, &layout.report_path()) {
            tracing::warn!(error = %format!("{e:#}"), "could not write bootstrap report");
        }

        self.enter(BootstrapState::Configured);
        Ok(report)
    }

    /// Start the web server and block until it exits or `shutdown` resolves
    pub async fn launch(
        &mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<LaunchExit, BootstrapError> {
        let command = LaunchCommand::from_spec(&self.config.launch, &self.layout);
        println!("🚀 Starting web UI on port {}...", self.config.launch.port);

        let child = command.spawn()?;
        self.enter(BootstrapState::Running);
        let exit = command.supervise(child, shutdown).await;
        self.enter(BootstrapState::Terminated);
        exit
    }
}

/// Prepare the volume, then run the web server until it exits or `shutdown` resolves
pub async fn bootstrap_and_run(
    config: DeploymentConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<LaunchExit, BootstrapError> {
    let mut bootstrapper = Bootstrapper::new(config);
    let report = bootstrapper.prepare().await?;
    print_report(&report);
    bootstrapper.launch(shutdown).await
}
