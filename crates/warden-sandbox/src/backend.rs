//! Isolation backends that turn a shell command into a restricted process.

use crate::config::{BackendKind, SandboxConfig};
use crate::error::SandboxError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Trait for sandbox backends.
///
/// A backend builds the process invocation for one execution and tears down
/// whatever it created once that execution is over.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Build the process that runs `command` under `config`.
    fn build_command(
        &self,
        execution_id: &str,
        command: &str,
        config: &SandboxConfig,
    ) -> Result<Command, SandboxError>;

    /// Check that the backend can run at all on this host.
    async fn probe(&self) -> Result<(), SandboxError>;

    /// Remove every resource created for `execution_id`. Must be safe to call
    /// whether the execution succeeded, failed, or timed out.
    async fn cleanup(&self, execution_id: &str);

    /// Message used when spawning the backend binary fails with `NotFound`.
    fn unavailable_message(&self) -> String {
        format!("{} sandbox backend unavailable on this host", self.name())
    }
}

/// Resolve the backend for a configured kind.
pub fn backend_for(kind: BackendKind) -> Arc<dyn SandboxBackend> {
    match kind {
        BackendKind::Docker => Arc::new(DockerBackend),
        BackendKind::Bubblewrap => Arc::new(BubblewrapBackend),
        BackendKind::Host => Arc::new(HostBackend),
    }
}

/// Container name used for an execution.
pub fn container_name(execution_id: &str) -> String {
    format!("warden-{}", execution_id.to_ascii_lowercase())
}

/// Ephemeral hardened docker container per execution.
pub struct DockerBackend;

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn build_command(
        &self,
        execution_id: &str,
        command: &str,
        config: &SandboxConfig,
    ) -> Result<Command, SandboxError> {
        validate_image_name(&config.image)?;
        validate_limit(&config.memory_limit, "memory limit")?;
        validate_limit(&config.tmpfs_size, "tmpfs size")?;
        if !(config.cpu_limit > 0.0) {
            return Err(SandboxError::InvalidConfig(
                "cpu limit must be positive".to_string(),
            ));
        }

        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("--name")
            .arg(container_name(execution_id))
            .arg("--label")
            .arg(format!("warden.execution={execution_id}"))
            .arg("--cap-drop=ALL");

        for cap in config.security_level.added_capabilities() {
            cmd.arg(format!("--cap-add={cap}"));
        }

        cmd.arg("--security-opt=no-new-privileges")
            .arg("--read-only")
            .arg(if config.network_enabled {
                "--network=bridge"
            } else {
                "--network=none"
            })
            .arg("--tmpfs")
            .arg(format!("/tmp:size={}", config.tmpfs_size))
            .arg(format!("--pids-limit={}", config.pids_limit))
            .arg(format!("--memory={}", config.memory_limit))
            .arg(format!("--cpus={}", config.cpu_limit));

        if let Some(dir) = &config.working_dir {
            let mode = if config.workspace_writable { "rw" } else { "ro" };
            cmd.arg("-v")
                .arg(format!("{}:/workspace:{mode}", dir.display()))
                .arg("-w")
                .arg("/workspace");
        }

        cmd.arg(&config.image).arg("/bin/sh").arg("-c").arg(command);
        Ok(cmd)
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        let status = Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                SandboxError::BackendUnavailable(format!(
                    "failed to check Docker daemon (is Docker installed?): {e}"
                ))
            })?;
        if !status.success() {
            return Err(SandboxError::BackendUnavailable(
                "Docker daemon is not running".to_string(),
            ));
        }
        Ok(())
    }

    async fn cleanup(&self, execution_id: &str) {
        let name = container_name(execution_id);
        match Command::new("docker")
            .args(["rm", "-f", &name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(_) => tracing::debug!(container = %name, "sandbox container removed"),
            Err(e) => tracing::warn!(container = %name, "failed to remove sandbox container: {e}"),
        }
    }

    fn unavailable_message(&self) -> String {
        "Docker sandbox backend unavailable (docker binary not found).".to_string()
    }
}

/// Linux bubblewrap namespace sandbox. Resource ceilings are not enforced here.
pub struct BubblewrapBackend;

#[async_trait]
impl SandboxBackend for BubblewrapBackend {
    fn name(&self) -> &'static str {
        "bubblewrap"
    }

    fn build_command(
        &self,
        _execution_id: &str,
        command: &str,
        config: &SandboxConfig,
    ) -> Result<Command, SandboxError> {
        let mut cmd = Command::new("bwrap");
        cmd.arg("--die-with-parent")
            .arg("--new-session")
            .arg("--unshare-pid")
            .arg("--proc")
            .arg("/proc")
            .arg("--dev")
            .arg("/dev")
            .arg("--ro-bind")
            .arg("/")
            .arg("/")
            .arg("--tmpfs")
            .arg("/tmp");

        if let Some(dir) = &config.working_dir {
            let workspace = dir
                .canonicalize()
                .map_err(|e| SandboxError::Execution(format!("Cannot resolve workspace: {e}")))?;
            let bind = if config.workspace_writable { "--bind" } else { "--ro-bind" };
            cmd.arg(bind).arg(&workspace).arg(&workspace);
            cmd.arg("--chdir").arg(&workspace);
        }

        if !config.network_enabled {
            cmd.arg("--unshare-net");
        }

        cmd.arg("/bin/sh").arg("-c").arg(command);
        Ok(cmd)
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        Command::new("bwrap")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|_| ())
            .map_err(|_| SandboxError::BackendUnavailable(self.unavailable_message()))
    }

    async fn cleanup(&self, _execution_id: &str) {}

    fn unavailable_message(&self) -> String {
        "Linux sandbox backend (bubblewrap) unavailable.".to_string()
    }
}

/// Direct host execution with no isolation.
pub struct HostBackend;

#[async_trait]
impl SandboxBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn build_command(
        &self,
        _execution_id: &str,
        command: &str,
        config: &SandboxConfig,
    ) -> Result<Command, SandboxError> {
        let (shell, flag) = shell_and_flag();
        let mut cmd = Command::new(shell);
        cmd.arg(flag).arg(command);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn cleanup(&self, _execution_id: &str) {}
}

fn shell_and_flag() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("/bin/sh", "-c")
    }
}

fn validate_image_name(image: &str) -> Result<(), SandboxError> {
    if image.is_empty() || image.len() > 256 {
        return Err(SandboxError::InvalidConfig(
            "docker image name must be 1-256 characters".to_string(),
        ));
    }
    if image.starts_with(['-', '.', ':']) {
        return Err(SandboxError::InvalidConfig(format!(
            "docker image name '{image}' must not start with a special character"
        )));
    }
    if let Some(ch) = image
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '-' | '.' | ':' | '/' | '_' | '@'))
    {
        return Err(SandboxError::InvalidConfig(format!(
            "docker image name contains invalid character {ch:?}"
        )));
    }
    Ok(())
}

fn validate_limit(value: &str, what: &str) -> Result<(), SandboxError> {
    let digits = value.trim_end_matches(|c: char| matches!(c, 'b' | 'k' | 'm' | 'g' | 'B' | 'K' | 'M' | 'G'));
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(SandboxError::InvalidConfig(format!(
            "{what} '{value}' is not a valid size"
        )));
    }
    Ok(())
}
