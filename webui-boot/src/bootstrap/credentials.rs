//! Credential materialization for model hosts
//!
//! Secrets arrive as environment variables. Each configured secret that is
//! present is rendered through its template and written to the location
//! the provider's tooling reads from.

use crate::bootstrap::report::{Step, StepOutcome};
use crate::config::{CredentialMode, SecretSpec, expand_path};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Lookup of secret values by environment variable name
pub trait SecretSource: Send + Sync {
    fn secret(&self, env: &str) -> Option<String>;
}

/// Reads secrets from the process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, env: &str) -> Option<String> {
        std::env::var(env).ok().filter(|v| !v.is_empty())
    }
}

impl SecretSource for HashMap<String, String> {
    fn secret(&self, env: &str) -> Option<String> {
        self.get(env).filter(|v| !v.is_empty()).cloned()
    }
}

/// Write one credential file per present secret
pub fn materialize_credentials(
    specs: &[SecretSpec],
    source: &dyn SecretSource,
    mode: CredentialMode,
) -> Vec<StepOutcome> {
    if mode == CredentialMode::LegacyPlaintext && !specs.is_empty() {
        tracing::warn!("credential files are written world-readable (legacy-plaintext mode)");
    }

    specs
        .iter()
        .map(|spec| {
            let Some(token) = source.secret(&spec.env) else {
                return StepOutcome::skipped(
                    Step::Credentials,
                    &spec.name,
                    format!("{} not set", spec.env),
                );
            };

            if mode == CredentialMode::EnvOnly {
                return StepOutcome::skipped(
                    Step::Credentials,
                    &spec.name,
                    format!("env-only mode, left in {}", spec.env),
                );
            }

            let path = expand_path(&spec.path);
            match write_credential(spec, &token, &path, mode) {
                Ok(()) => StepOutcome::ok(
                    Step::Credentials,
                    &spec.name,
                    format!("wrote {}", path.display()),
                ),
                Err(e) => StepOutcome::failed(Step::Credentials, &spec.name, format!("{e:#}")),
            }
        })
        .collect()
}

fn render(spec: &SecretSpec, token: &str) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("token", token);
    tera::Tera::one_off(&spec.template, &context, false)
        .with_context(|| format!("Failed to render credential template for {}", spec.name))
}

fn write_credential(
    spec: &SecretSpec,
    token: &str,
    path: &Path,
    mode: CredentialMode,
) -> Result<()> {
    let content = render(spec, token)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = open_credential_file(path, mode)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Open `path` truncated, with permissions for `mode` in place before any
/// content is written
#[cfg(unix)]
fn open_credential_file(path: &Path, mode: CredentialMode) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let bits = if mode == CredentialMode::Restricted {
        0o600
    } else {
        0o644
    };
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(bits)
        .open(path)?;
    // `mode` only applies on creation; an existing file keeps its own bits
    file.set_permissions(fs::Permissions::from_mode(bits))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_credential_file(path: &Path, _mode: CredentialMode) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::report::StepStatus;
    use std::path::PathBuf;

    fn specs(dir: &Path) -> Vec<SecretSpec> {
        vec![
            SecretSpec {
                name: "huggingface".to_string(),
                env: "HF_TOKEN".to_string(),
                path: dir.join("hf/token"),
                template: "{{ token }}".to_string(),
            },
            SecretSpec {
                name: "civitai".to_string(),
                env: "CIVITAI_TOKEN".to_string(),
                path: dir.join("civitai/config.json"),
                template: r#"{"api_key": "{{ token }}"}"#.to_string(),
            },
        ]
    }

    #[test]
    fn test_present_secret_is_written_absent_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = HashMap::from([("CIVITAI_TOKEN".to_string(), "abc123".to_string())]);

        let outcomes =
            materialize_credentials(&specs(dir.path()), &secrets, CredentialMode::Restricted);

        assert!(matches!(outcomes[0].status, StepStatus::Skipped(_)));
        assert!(!dir.path().join("hf/token").exists());
        assert!(matches!(outcomes[1].status, StepStatus::Ok(_)));
        assert_eq!(
            fs::read_to_string(dir.path().join("civitai/config.json")).unwrap(),
            r#"{"api_key": "abc123"}"#
        );
    }

    #[test]
    fn test_env_only_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = HashMap::from([("HF_TOKEN".to_string(), "hf_x".to_string())]);

        let outcomes =
            materialize_credentials(&specs(dir.path()), &secrets, CredentialMode::EnvOnly);

        assert!(outcomes.iter().all(|o| !o.is_failure()));
        assert!(!dir.path().join("hf/token").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_restricted_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let secrets = HashMap::from([("HF_TOKEN".to_string(), "hf_x".to_string())]);
        materialize_credentials(&specs(dir.path()), &secrets, CredentialMode::Restricted);

        let path: PathBuf = dir.path().join("hf/token");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(path).unwrap(), "hf_x");
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_readable_file_is_tightened() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("hf/token");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old-token-that-is-longer").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let secrets = HashMap::from([("HF_TOKEN".to_string(), "hf_x".to_string())]);
        materialize_credentials(&specs(dir.path()), &secrets, CredentialMode::Restricted);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(path).unwrap(), "hf_x");
    }
}
