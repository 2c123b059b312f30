//! 预检
//!
//! 在任何变更之前确认主机能力。硬检查失败立即终止并给出修复提示；
//! 软检查（磁盘、内存）交互模式下询问操作员，非交互模式下只记警告。

use std::time::Instant;
use tracing::{info, warn};

use crate::config::BootstrapConfig;
use crate::domain::deploy::StageResult;
use crate::error::{BootstrapError, BootstrapResult};
use crate::infra::host::bytes_to_gb;
use crate::infra::{Confirm, ContainerRuntime, HostInspector};

/// 执行预检，返回各项检查结果
pub async fn run_preflight(
    config: &BootstrapConfig,
    runtime: &dyn ContainerRuntime,
    host: &dyn HostInspector,
    prompt: &dyn Confirm,
) -> BootstrapResult<Vec<StageResult>> {
    let mut results = Vec::new();

    // 1. 运行时二进制
    let started = Instant::now();
    if !runtime.runtime_installed().await {
        return Err(BootstrapError::preflight(
            "runtime_installed",
            "container runtime binary not found on PATH",
            "Install Docker Engine: https://docs.docker.com/engine/install/",
        ));
    }
    results.push(StageResult::pass("runtime_installed", "docker found").timed(started));

    // 2. 运行时守护进程
    let started = Instant::now();
    if !runtime.daemon_reachable().await {
        return Err(BootstrapError::preflight(
            "daemon_reachable",
            "container runtime daemon is not reachable",
            "Start the daemon with `sudo systemctl start docker` and check `docker info`",
        ));
    }
    results.push(StageResult::pass("daemon_reachable", "docker info ok").timed(started));

    // 3. 编排工具
    let started = Instant::now();
    if !runtime.compose_available().await {
        return Err(BootstrapError::preflight(
            "compose_available",
            "docker compose is not available",
            "Install the compose plugin: `sudo apt install docker-compose-plugin`",
        ));
    }
    results.push(StageResult::pass("compose_available", "compose found").timed(started));

    // 4. 磁盘空间（软检查）
    let started = Instant::now();
    let disk = match host.free_disk_bytes(&config.project_dir) {
        Some(free) => {
            let free_gb = bytes_to_gb(free);
            let detail = format!("{:.1} GB free (minimum {:.1} GB)", free_gb, config.min_disk_gb);
            if free_gb >= config.min_disk_gb {
                StageResult::pass("disk_space", detail)
            } else {
                soft_check(config, prompt, "disk_space", detail)?
            }
        }
        None => StageResult::warn("disk_space", "could not determine free disk space"),
    };
    results.push(disk.timed(started));

    // 5. 内存（软检查）
    let started = Instant::now();
    let memory_gb = bytes_to_gb(host.available_memory_bytes());
    let detail = format!(
        "{:.1} GB available (minimum {:.1} GB)",
        memory_gb, config.min_memory_gb
    );
    let memory = if memory_gb >= config.min_memory_gb {
        StageResult::pass("memory", detail)
    } else {
        soft_check(config, prompt, "memory", detail)?
    };
    results.push(memory.timed(started));

    // 6. 配置文件
    let started = Instant::now();
    for (check, path, hint) in [
        (
            "env_file",
            &config.env_file,
            "Create it from the template: `cp .env.example .env` and fill in the secrets",
        ),
        (
            "compose_file",
            &config.compose_file,
            "Run from the project root or pass --compose-file",
        ),
    ] {
        if !host.file_exists(path) {
            return Err(BootstrapError::preflight(
                check,
                format!("{} does not exist", path.display()),
                hint,
            ));
        }
        results.push(StageResult::pass(check, path.display().to_string()).timed(started));
    }

    info!(checks = results.len(), "Preflight complete");
    Ok(results)
}

/// 软检查未通过：交互模式询问，非交互模式记警告
fn soft_check(
    config: &BootstrapConfig,
    prompt: &dyn Confirm,
    check: &str,
    detail: String,
) -> BootstrapResult<StageResult> {
    warn!(check = %check, detail = %detail, "Soft preflight check below threshold");

    if config.non_interactive || !prompt.is_interactive() {
        return Ok(StageResult::warn(check, detail));
    }

    if prompt.confirm(&format!("{}: {}. Continue anyway?", check, detail)) {
        Ok(StageResult::warn(check, format!("{} (operator confirmed)", detail)))
    } else {
        Err(BootstrapError::PreflightDeclined {
            check: check.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deploy::StageStatus;
    use crate::services::testing::{FakeHost, FakePrompt, FakeRuntime, TestProject};

    #[tokio::test]
    async fn test_all_checks_pass() {
        let project = TestProject::new();
        let runtime = FakeRuntime::new();
        let results = run_preflight(&project.config, &runtime, &FakeHost::roomy(), &FakePrompt::never())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.status == StageStatus::Pass));
        assert_eq!(results.len(), 7);
    }

    #[tokio::test]
    async fn test_missing_runtime_aborts_with_hint() {
        let project = TestProject::new();
        let runtime = FakeRuntime::new();
        runtime.state().installed = false;
        let err = run_preflight(&project.config, &runtime, &FakeHost::roomy(), &FakePrompt::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Preflight { ref check, .. } if check == "runtime_installed"));
        assert!(err.hint().is_some());
        assert_eq!(err.exit_code(), 10);
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_hard_failure() {
        let project = TestProject::new();
        let runtime = FakeRuntime::new();
        runtime.state().daemon_up = false;
        let err = run_preflight(&project.config, &runtime, &FakeHost::roomy(), &FakePrompt::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Preflight { ref check, .. } if check == "daemon_reachable"));
    }

    #[tokio::test]
    async fn test_low_disk_non_interactive_warns() {
        let mut project = TestProject::new();
        project.config.non_interactive = true;
        let host = FakeHost {
            disk_gb: 4.0,
            memory_gb: 16.0,
        };
        let results = run_preflight(&project.config, &FakeRuntime::new(), &host, &FakePrompt::always())
            .await
            .unwrap();
        let disk = results.iter().find(|r| r.name == "disk_space").unwrap();
        assert_eq!(disk.status, StageStatus::Warn);
    }

    #[tokio::test]
    async fn test_low_memory_interactive_decline_aborts() {
        let project = TestProject::new();
        let host = FakeHost {
            disk_gb: 100.0,
            memory_gb: 1.0,
        };
        let err = run_preflight(&project.config, &FakeRuntime::new(), &host, &FakePrompt::declines())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::PreflightDeclined { ref check } if check == "memory"));
    }

    #[tokio::test]
    async fn test_low_memory_interactive_confirm_continues() {
        let project = TestProject::new();
        let host = FakeHost {
            disk_gb: 100.0,
            memory_gb: 1.0,
        };
        let results = run_preflight(&project.config, &FakeRuntime::new(), &host, &FakePrompt::always())
            .await
            .unwrap();
        let memory = results.iter().find(|r| r.name == "memory").unwrap();
        assert_eq!(memory.status, StageStatus::Warn);
        assert!(memory.detail.contains("operator confirmed"));
    }

    #[tokio::test]
    async fn test_missing_env_file_is_hard_failure() {
        let project = TestProject::new();
        std::fs::remove_file(&project.config.env_file).unwrap();
        let err = run_preflight(&project.config, &FakeRuntime::new(), &FakeHost::roomy(), &FakePrompt::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Preflight { ref check, .. } if check == "env_file"));
    }
}
