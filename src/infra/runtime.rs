//! Container runtime collaborator
//!
//! Wraps the Docker / Docker Compose CLI. Control decisions only use exit
//! codes; stdout is parsed for nothing beyond the running-service list.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::env::constants::SHORT_COMMAND_TIMEOUT_SECS;
use crate::config::BootstrapConfig;

use super::command::{CommandError, CommandRunner, CommandSpec};

/// Runtime command failure
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("`{command}` could not run: {source}")]
    Command {
        command: String,
        #[source]
        source: CommandError,
    },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Request to run a command inside a service container
#[derive(Clone, Debug, Default)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    /// Variables forwarded by name only (`-e KEY`); values live on the child process
    pub secret_env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn secret(mut self, key: &str, value: &str) -> Self {
        self.secret_env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// Captured output of a container command
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Container runtime / orchestration tool
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime binary present on PATH
    async fn runtime_installed(&self) -> bool;
    /// Runtime daemon answers
    async fn daemon_reachable(&self) -> bool;
    /// Compose tool present
    async fn compose_available(&self) -> bool;
    /// Services whose containers are currently running
    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError>;
    async fn build(&self, services: &[String]) -> Result<(), RuntimeError>;
    async fn start(&self, services: &[String]) -> Result<(), RuntimeError>;
    /// Stop (never remove) the given services
    async fn stop(&self, services: &[String]) -> Result<(), RuntimeError>;
    /// Run a command in a running service container
    async fn exec(&self, service: &str, request: ExecRequest) -> Result<ExecOutput, RuntimeError>;
    /// Run a command in a running service container, stdout written to `out`
    async fn exec_to_file(
        &self,
        service: &str,
        request: ExecRequest,
        out: std::fs::File,
    ) -> Result<(), RuntimeError>;
    /// Run a command in a throwaway container of the service
    async fn run_oneoff(&self, service: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError>;
    /// Command prefix shown to operators (e.g. `docker compose -f docker-compose.yml`)
    fn compose_display(&self) -> String;

    fn logs_command(&self, service: &str) -> String {
        format!("{} logs --tail=100 {}", self.compose_display(), service)
    }
}

/// Docker Compose implementation
pub struct ComposeRuntime {
    project_dir: PathBuf,
    compose_file: PathBuf,
    compose_cmd: String,
    compose_args: Vec<String>,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl ComposeRuntime {
    /// Create a runtime, detecting `docker-compose` vs `docker compose`
    pub async fn detect(config: &BootstrapConfig, cancel: CancellationToken) -> Self {
        let (compose_cmd, compose_args) = detect_compose_command().await;
        info!(command = %compose_cmd, args = ?compose_args, "Using compose command");
        Self {
            project_dir: config.project_dir.clone(),
            compose_file: config.compose_file.clone(),
            compose_cmd: compose_cmd.to_string(),
            compose_args: compose_args.into_iter().map(String::from).collect(),
            command_timeout: config.timeouts.command,
            cancel,
        }
    }

    fn compose(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.compose_cmd, &[], timeout)
            .args(self.compose_args.iter().cloned())
            .arg("-f")
            .arg(self.compose_file.to_string_lossy().to_string())
            .current_dir(&self.project_dir)
    }

    fn short_timeout() -> Duration {
        Duration::from_secs(SHORT_COMMAND_TIMEOUT_SECS)
    }

    async fn run_streaming(&self, spec: CommandSpec) -> Result<(), RuntimeError> {
        let command = spec.display();
        let result = CommandRunner::run_with_streaming(&spec, &self.cancel)
            .await
            .map_err(|source| RuntimeError::Command {
                command: command.clone(),
                source,
            })?;
        if result.timed_out {
            return Err(RuntimeError::Command {
                command,
                source: CommandError::Timeout,
            });
        }
        if !result.status.success() {
            return Err(RuntimeError::Exit {
                command,
                code: result.status.code(),
                stderr: "see log output above".to_string(),
            });
        }
        Ok(())
    }

    fn exec_spec(&self, service: &str, request: &ExecRequest, timeout: Duration) -> CommandSpec {
        let mut spec = self.compose(timeout).args(["exec", "-T"]);
        for (key, value) in &request.secret_env {
            spec = spec.arg("-e").arg(key.clone()).env(key, value);
        }
        spec = spec.arg(service).args(request.argv.iter().cloned());
        if let Some(ref input) = request.stdin {
            spec = spec.stdin(input.clone());
        }
        spec
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn runtime_installed(&self) -> bool {
        CommandRunner::is_on_path("docker").await
    }

    async fn daemon_reachable(&self) -> bool {
        CommandRunner::run_simple("docker", &["info"], Self::short_timeout())
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn compose_available(&self) -> bool {
        let mut spec = CommandSpec::new(&self.compose_cmd, &[], Self::short_timeout());
        spec = spec.args(self.compose_args.iter().cloned()).arg("version");
        CommandRunner::run(&spec)
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError> {
        let spec = self
            .compose(Self::short_timeout())
            .args(["ps", "--services", "--filter", "status=running"]);
        let command = spec.display();
        let output = CommandRunner::run(&spec)
            .await
            .map_err(|source| RuntimeError::Command {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(RuntimeError::Exit {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn build(&self, services: &[String]) -> Result<(), RuntimeError> {
        if services.is_empty() {
            return Ok(());
        }
        let spec = self
            .compose(self.command_timeout)
            .arg("build")
            .args(services.iter().cloned());
        self.run_streaming(spec).await
    }

    async fn start(&self, services: &[String]) -> Result<(), RuntimeError> {
        if services.is_empty() {
            return Ok(());
        }
        let spec = self
            .compose(self.command_timeout)
            .args(["up", "-d", "--no-deps"])
            .args(services.iter().cloned());
        self.run_streaming(spec).await
    }

    async fn stop(&self, services: &[String]) -> Result<(), RuntimeError> {
        if services.is_empty() {
            return Ok(());
        }
        let spec = self
            .compose(self.command_timeout)
            .arg("stop")
            .args(services.iter().cloned());
        let command = spec.display();
        // rollback must still run after Ctrl-C, so this one ignores the run's cancel token
        let output = CommandRunner::run(&spec)
            .await
            .map_err(|source| RuntimeError::Command {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %command, %stderr, "Stop command failed");
            return Err(RuntimeError::Exit {
                command,
                code: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }

    async fn exec(&self, service: &str, request: ExecRequest) -> Result<ExecOutput, RuntimeError> {
        let spec = self.exec_spec(service, &request, Self::short_timeout());
        drop(request);
        let command = spec.display();
        let output = CommandRunner::run(&spec)
            .await
            .map_err(|source| RuntimeError::Command { command, source })?;
        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn exec_to_file(
        &self,
        service: &str,
        request: ExecRequest,
        out: std::fs::File,
    ) -> Result<(), RuntimeError> {
        let spec = self.exec_spec(service, &request, self.command_timeout);
        drop(request);
        let command = spec.display();
        let (status, stderr) = CommandRunner::run_to_file(&spec, out)
            .await
            .map_err(|source| RuntimeError::Command {
                command: command.clone(),
                source,
            })?;
        if !status.success() {
            return Err(RuntimeError::Exit {
                command,
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn run_oneoff(&self, service: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let spec = self
            .compose(self.command_timeout)
            .args(["run", "--rm", "-T", "--no-deps"])
            .arg(service)
            .args(argv.iter().cloned());
        let command = spec.display();
        let output = CommandRunner::run(&spec)
            .await
            .map_err(|source| RuntimeError::Command { command, source })?;
        Ok(ExecOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn compose_display(&self) -> String {
        let mut parts = vec![self.compose_cmd.clone()];
        parts.extend(self.compose_args.iter().cloned());
        parts.push("-f".to_string());
        parts.push(self.compose_file.display().to_string());
        parts.join(" ")
    }
}

/// Detect which docker-compose command to use
async fn detect_compose_command() -> (&'static str, Vec<&'static str>) {
    if CommandRunner::is_on_path("docker-compose").await {
        ("docker-compose", vec![])
    } else {
        ("docker", vec!["compose"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> ComposeRuntime {
        ComposeRuntime {
            project_dir: PathBuf::from("/srv/homelab"),
            compose_file: PathBuf::from("/srv/homelab/docker-compose.yml"),
            compose_cmd: "docker".to_string(),
            compose_args: vec!["compose".to_string()],
            command_timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_exec_spec_keeps_secret_off_command_line() {
        let rt = runtime();
        let request = ExecRequest::new(["pg_dumpall", "-U", "postgres"]).secret("PGPASSWORD", "hunter2");
        let spec = rt.exec_spec("postgres", &request, Duration::from_secs(5));

        assert!(!spec.args.iter().any(|a| a.contains("hunter2")));
        assert!(spec.args.windows(2).any(|w| w[0] == "-e" && w[1] == "PGPASSWORD"));
        assert_eq!(spec.env, vec![("PGPASSWORD".to_string(), "hunter2".to_string())]);
        assert_eq!(
            spec.display(),
            "docker compose -f /srv/homelab/docker-compose.yml exec -T -e PGPASSWORD postgres pg_dumpall -U postgres"
        );
    }

    #[test]
    fn test_logs_command() {
        assert_eq!(
            runtime().logs_command("postgres"),
            "docker compose -f /srv/homelab/docker-compose.yml logs --tail=100 postgres"
        );
    }

    #[test]
    fn test_exec_output_success() {
        let out = ExecOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(out.success());
        assert!(!ExecOutput::default().success());
    }
}
