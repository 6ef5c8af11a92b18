//! Bootstrap and launch of a generative-image web UI on a persistent volume
//!
//! The hosting platform mounts a volume, injects secrets as environment
//! variables and invokes one of the exported operations:
//! - [`bootstrap::bootstrap_and_run`] seeds and repairs the volume, then
//!   supervises the web server process
//! - [`artifacts`] uploads, lists and fetches model files on the volume
//! - [`image::render_build_steps`] produces the image builder's steps
//!
//! Everything is driven by a single [`config::DeploymentConfig`].

pub mod artifacts;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod error;
pub mod image;
pub mod volume;

pub use artifacts::{
    ArtifactEntry, FetchResult, UploadResult, fetch_remote_artifact, list_artifacts,
    upload_artifact,
};
pub use bootstrap::{BootstrapState, Bootstrapper, bootstrap_and_run};
pub use config::DeploymentConfig;
pub use error::{ArtifactError, BootstrapError};
pub use volume::{ArtifactCategory, VolumeLayout};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
