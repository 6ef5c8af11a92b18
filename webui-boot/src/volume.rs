//! Fixed layout of the persistent volume

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory under the volume root holding our own bookkeeping
pub const STATE_DIR: &str = ".webui-boot";

/// Model categories the web UI reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactCategory {
    StableDiffusion,
    Lora,
    Vae,
    Embeddings,
}

impl ArtifactCategory {
    /// Path of the category relative to the volume root
    pub fn relative_dir(self) -> &'static str {
        match self {
            ArtifactCategory::StableDiffusion => "models/Stable-diffusion",
            ArtifactCategory::Lora => "models/Lora",
            ArtifactCategory::Vae => "models/VAE",
            ArtifactCategory::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactCategory::StableDiffusion => write!(f, "stable-diffusion"),
            ArtifactCategory::Lora => write!(f, "lora"),
            ArtifactCategory::Vae => write!(f, "vae"),
            ArtifactCategory::Embeddings => write!(f, "embeddings"),
        }
    }
}

/// Paths derived from the volume mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLayout {
    root: PathBuf,
}

impl VolumeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a volume-relative path
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn category_dir(&self, category: ArtifactCategory) -> PathBuf {
        self.root.join(category.relative_dir())
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join("extensions")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn report_path(&self) -> PathBuf {
        self.state_dir().join("bootstrap-report.toon")
    }
}
