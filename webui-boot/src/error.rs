//! Typed errors for the fatal bootstrap path and the artifact operations
//!
//! Everything that is allowed to degrade (directory repair, credentials,
//! patching, extension installs) is reported as a `StepOutcome` instead.

use snafu::Snafu;
use std::path::PathBuf;

/// Failures that stop the web server from reaching `RUNNING`
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BootstrapError {
    #[snafu(display("seed tree not found at {}", path.display()))]
    SeedMissing { path: PathBuf },

    #[snafu(display("failed to copy {} into {}", from.display(), to.display()))]
    SeedCopy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to spawn web server `{command}`"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("failed while waiting on web server process"))]
    Wait { source: std::io::Error },

    #[snafu(display("bootstrap task did not complete"))]
    Task { source: tokio::task::JoinError },
}

/// Failures local to upload / list / fetch
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ArtifactError {
    #[snafu(display("source file not found: {}", path.display()))]
    SourceMissing { path: PathBuf },

    #[snafu(display("invalid artifact name: {name:?}"))]
    InvalidName { name: String },

    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("{url} answered with HTTP {status}"))]
    Status { url: String, status: u16 },
}
