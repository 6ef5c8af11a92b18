//! Web server launch and supervision
//!
//! The command runs through `sh -c` so the virtualenv can be activated;
//! the interpreter is `exec`ed so signals reach it directly.

use crate::config::LaunchSpec;
use crate::error::{BootstrapError, SpawnSnafu, WaitSnafu};
use crate::volume::VolumeLayout;
use snafu::ResultExt;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// How a supervised web server invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchExit {
    /// The server exited on its own
    Exited(ExitStatus),
    /// Shutdown was requested; the server was terminated
    Cancelled(ExitStatus),
}

impl LaunchExit {
    /// Process exit code to report for this invocation
    pub fn code(&self) -> i32 {
        match self {
            LaunchExit::Exited(status) => status.code().unwrap_or(1),
            LaunchExit::Cancelled(_) => 0,
        }
    }
}

/// Shell command line starting the web server on the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    script: String,
    cwd: PathBuf,
    grace: Duration,
}

impl LaunchCommand {
    pub fn from_spec(spec: &LaunchSpec, layout: &VolumeLayout) -> Self {
        let mut parts: Vec<String> = Vec::new();

        if let Some(venv) = &spec.venv {
            parts.push(format!(". {}/bin/activate &&", shell_quote(venv)));
        }

        parts.push("exec".to_string());
        match &spec.mixed_precision {
            Some(precision) => {
                parts.push("accelerate".to_string());
                parts.push("launch".to_string());
                parts.push(format!("--mixed_precision={}", shell_quote(precision)));
            }
            None => parts.push(shell_quote(&spec.python)),
        }
        parts.push(shell_quote(&spec.entry));

        let flags = &spec.flags;
        let switches = [
            (flags.listen, "--listen"),
            (flags.skip_prepare_environment, "--skip-prepare-environment"),
            (flags.skip_torch_cuda_test, "--skip-torch-cuda-test"),
            (flags.no_download_sd_model, "--no-download-sd-model"),
            (flags.xformers, "--xformers"),
            (flags.api, "--api"),
            (
                flags.enable_insecure_extension_access,
                "--enable-insecure-extension-access",
            ),
        ];
        parts.push("--port".to_string());
        parts.push(spec.port.to_string());
        parts.extend(
            switches
                .iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, flag)| (*flag).to_string()),
        );
        parts.extend(spec.extra_args.iter().map(|arg| shell_quote(arg)));

        Self {
            script: parts.join(" "),
            cwd: layout.root().to_path_buf(),
            grace: Duration::from_secs(spec.grace_period_secs),
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn spawn(&self) -> Result<Child, BootstrapError> {
        Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                command: self.script.clone(),
            })
    }

    /// Run until the server exits or `shutdown` resolves
    pub async fn run(
        &self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<LaunchExit, BootstrapError> {
        let child = self.spawn()?;
        self.supervise(child, shutdown).await
    }

    /// Wait on a spawned server, terminating it if `shutdown` resolves first
    pub async fn supervise(
        &self,
        mut child: Child,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<LaunchExit, BootstrapError> {
        tracing::info!(pid = child.id(), command = %self.script, "web server started");

        tokio::pin!(shutdown);
        tokio::select! {
            status = child.wait() => {
                let status = status.context(WaitSnafu)?;
                tracing::info!(%status, "web server exited");
                Ok(LaunchExit::Exited(status))
            }
            () = &mut shutdown => {
                tracing::info!("shutdown requested, stopping web server");
                let status = terminate(&mut child, self.grace).await?;
                Ok(LaunchExit::Cancelled(status))
            }
        }
    }
}

/// SIGTERM, then SIGKILL once the grace period runs out
async fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus, BootstrapError> {
    if request_stop(child) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.context(WaitSnafu);
        }
        tracing::warn!(?grace, "web server ignored SIGTERM, killing");
    }

    child.kill().await.context(WaitSnafu)?;
    child.wait().await.context(WaitSnafu)
}

#[cfg(unix)]
fn request_stop(child: &Child) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: pid belongs to a child that has not been reaped yet
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) -> bool {
    false
}

/// Single-quote `arg` for `sh` unless it is made of safe characters only
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchFlags;
    use std::time::Instant;

    fn spec(python: &str) -> LaunchSpec {
        LaunchSpec {
            python: python.to_string(),
            venv: None,
            grace_period_secs: 2,
            ..LaunchSpec::default()
        }
    }

    #[test]
    fn test_default_command_line() {
        let command = LaunchCommand::from_spec(&LaunchSpec::default(), &VolumeLayout::new("/webui"));
        assert_eq!(
            command.script(),
            ". venv/bin/activate && exec python launch.py --port 8000 --listen \
             --skip-prepare-environment --skip-torch-cuda-test --no-download-sd-model \
             --xformers --api --enable-insecure-extension-access"
        );
    }

    #[test]
    fn test_mixed_precision_and_extra_args() {
        let spec = LaunchSpec {
            venv: None,
            mixed_precision: Some("fp16".to_string()),
            flags: LaunchFlags {
                listen: true,
                api: false,
                skip_torch_cuda_test: false,
                enable_insecure_extension_access: false,
                xformers: false,
                no_download_sd_model: false,
                skip_prepare_environment: false,
            },
            extra_args: vec!["--ckpt-dir".to_string(), "my models".to_string()],
            ..LaunchSpec::default()
        };
        let command = LaunchCommand::from_spec(&spec, &VolumeLayout::new("/webui"));
        assert_eq!(
            command.script(),
            "exec accelerate launch --mixed_precision=fp16 launch.py --port 8000 --listen \
             --ckpt-dir 'my models'"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("launch.py"), "launch.py");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let command = LaunchCommand::from_spec(&spec("false"), &VolumeLayout::new(dir.path()));

        let exit = command.run(std::future::pending()).await.unwrap();
        assert!(matches!(exit, LaunchExit::Exited(status) if !status.success()));
        assert_eq!(exit.code(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("server.sh"), "exec sleep 30\n").unwrap();
        let mut launch = spec("sh");
        launch.entry = "server.sh".to_string();
        let command = LaunchCommand::from_spec(&launch, &VolumeLayout::new(dir.path()));

        let started = Instant::now();
        let exit = command
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();

        assert!(matches!(exit, LaunchExit::Cancelled(_)));
        assert_eq!(exit.code(), 0);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
