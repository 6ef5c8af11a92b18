//! Deployment configuration
//!
//! One struct replaces the per-variant deployment scripts: which web UI
//! ref to build, which extensions and models to install, which launch
//! flags to pass and which secrets to materialize. Every field has a
//! default so an empty (or absent) TOML file yields the stock deployment.

use crate::volume::{ArtifactCategory, VolumeLayout};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Mount point of the persistent volume
    pub volume_root: PathBuf,
    /// Image-baked application tree copied on first run
    pub seed_root: PathBuf,
    /// Volume-relative file whose presence marks a seeded volume
    pub marker: String,
    /// Volume-relative directories repaired on every start
    pub directories: Vec<String>,
    pub credential_mode: CredentialMode,
    pub secrets: Vec<SecretSpec>,
    pub patch: Option<ConfigPatchSpec>,
    pub extensions: Vec<ExtensionSpec>,
    pub models: Vec<ModelSpec>,
    pub launch: LaunchSpec,
    pub artifacts: ArtifactSpec,
    pub image: ImageSpec,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            volume_root: PathBuf::from("/webui"),
            seed_root: PathBuf::from("/app/webui"),
            marker: "launch.py".to_string(),
            directories: vec![
                ArtifactCategory::StableDiffusion.relative_dir().to_string(),
                ArtifactCategory::Lora.relative_dir().to_string(),
                ArtifactCategory::Vae.relative_dir().to_string(),
                ArtifactCategory::Embeddings.relative_dir().to_string(),
                "extensions".to_string(),
            ],
            credential_mode: CredentialMode::default(),
            secrets: vec![
                SecretSpec {
                    name: "huggingface".to_string(),
                    env: "HF_TOKEN".to_string(),
                    path: PathBuf::from("~/.cache/huggingface/token"),
                    template: "{{ token }}".to_string(),
                },
                SecretSpec {
                    name: "civitai".to_string(),
                    env: "CIVITAI_TOKEN".to_string(),
                    path: PathBuf::from("~/.civitai/config.json"),
                    template: r#"{"api_key": "{{ token }}"}"#.to_string(),
                },
            ],
            patch: Some(ConfigPatchSpec::default()),
            extensions: vec![ExtensionSpec {
                name: "sd-webui-additional-networks".to_string(),
                repo: "https://github.com/kohya-ss/sd-webui-additional-networks".to_string(),
                reference: None,
            }],
            models: vec![ModelSpec {
                name: "v1-5-pruned-emaonly.safetensors".to_string(),
                url: "https://huggingface.co/runwayml/stable-diffusion-v1-5/resolve/main/v1-5-pruned-emaonly.safetensors".to_string(),
                category: ArtifactCategory::StableDiffusion,
                token_env: Some("HF_TOKEN".to_string()),
            }],
            launch: LaunchSpec::default(),
            artifacts: ArtifactSpec::default(),
            image: ImageSpec::default(),
        }
    }
}

impl DeploymentConfig {
    /// Load from a TOML file, creating it with defaults when missing
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let path = expand_path(path);
                confy::load_path(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn layout(&self) -> VolumeLayout {
        VolumeLayout::new(expand_path(&self.volume_root))
    }

    pub fn seed_path(&self) -> PathBuf {
        expand_path(&self.seed_root)
    }
}

/// How secret values are written to provider credential files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// Leave the secret in the environment only; write nothing
    EnvOnly,
    /// Write the file readable by the owner only
    #[default]
    Restricted,
    /// Write with default permissions, as the old deployment scripts did
    LegacyPlaintext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretSpec {
    pub name: String,
    /// Environment variable the platform injects the secret as
    pub env: String,
    /// Credential file location (`~` expanded)
    pub path: PathBuf,
    /// Tera template; the secret is available as `token`
    pub template: String,
}

/// Allow-list merge applied to one source file of the web UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigPatchSpec {
    /// Volume-relative path of the file to patch
    pub file: PathBuf,
    /// Name of the list/set literal holding the allow-list
    pub variable: String,
    pub entries: Vec<String>,
}

impl Default for ConfigPatchSpec {
    fn default() -> Self {
        Self {
            file: PathBuf::from("modules/shared_options.py"),
            variable: "options_allowlist".to_string(),
            entries: vec![
                "sd_model_checkpoint".to_string(),
                "sd_vae".to_string(),
                "CLIP_stop_at_last_layers".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionSpec {
    /// Directory name under `extensions/`
    pub name: String,
    pub repo: String,
    /// Branch or tag; default branch when unset
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub url: String,
    pub category: ArtifactCategory,
    /// Environment variable holding a bearer token for the download
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LaunchSpec {
    pub port: u16,
    /// Entry script, relative to the volume root
    pub entry: String,
    pub python: String,
    /// Volume-relative virtualenv activated before launch
    pub venv: Option<String>,
    /// Wrap the entry script in `accelerate launch --mixed_precision=<value>`
    pub mixed_precision: Option<String>,
    pub extra_args: Vec<String>,
    /// Seconds to wait after SIGTERM before killing the child
    pub grace_period_secs: u64,
    pub flags: LaunchFlags,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            entry: "launch.py".to_string(),
            python: "python".to_string(),
            venv: Some("venv".to_string()),
            mixed_precision: None,
            extra_args: Vec::new(),
            grace_period_secs: 10,
            flags: LaunchFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LaunchFlags {
    pub listen: bool,
    pub api: bool,
    pub skip_torch_cuda_test: bool,
    pub enable_insecure_extension_access: bool,
    pub xformers: bool,
    pub no_download_sd_model: bool,
    pub skip_prepare_environment: bool,
}

impl Default for LaunchFlags {
    fn default() -> Self {
        Self {
            listen: true,
            api: true,
            skip_torch_cuda_test: true,
            enable_insecure_extension_access: true,
            xformers: true,
            no_download_sd_model: true,
            skip_prepare_environment: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactSpec {
    /// File extensions (without dot) reported by `list`
    pub accepted_extensions: Vec<String>,
}

impl Default for ArtifactSpec {
    fn default() -> Self {
        Self {
            accepted_extensions: vec![
                "safetensors".to_string(),
                "ckpt".to_string(),
                "pt".to_string(),
            ],
        }
    }
}

/// Inputs for the image builder's ordered build steps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageSpec {
    pub python_version: String,
    pub apt_packages: Vec<String>,
    pub pip_packages: Vec<String>,
    pub torch_index_url: String,
    pub repo: String,
    /// Branch or tag of the web UI to build
    pub reference: Option<String>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            python_version: "3.10".to_string(),
            apt_packages: [
                "wget",
                "git",
                "libgl1",
                "libglib2.0-0",
                "libsm6",
                "libxext6",
                "libxrender-dev",
                "python3-venv",
                "python3-pip",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            pip_packages: vec!["accelerate".to_string(), "safetensors".to_string()],
            torch_index_url: "https://download.pytorch.org/whl/cu118".to_string(),
            repo: "https://github.com/AUTOMATIC1111/stable-diffusion-webui".to_string(),
            reference: None,
        }
    }
}

/// Expand path with tilde (~) to home directory
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}
