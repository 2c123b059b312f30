//! 回滚控制
//!
//! 变更开始后任何阶段失败（含中断）都会进入这里：按启动的逆序停止本次运行启动的服务，
//! 不删除任何容器或卷，并给出备份位置、恢复命令与排查清单。
//! 回滚本身出错只记录，不再抛出。

use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::config::BootstrapConfig;
use crate::domain::deploy::Phase;
use crate::error::BootstrapError;
use crate::infra::ContainerRuntime;

use super::stages::RunLedger;

/// 回滚保护：变更开始前武装，健康验证通过后解除
#[derive(Debug, Default)]
pub struct RollbackGuard {
    armed: bool,
}

impl RollbackGuard {
    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// 回滚报告
#[derive(Clone, Debug, Serialize)]
pub struct RollbackReport {
    pub failed_phase: Phase,
    pub reason: String,
    pub exit_code: i32,
    /// 已停止的服务（按停止顺序）
    pub stopped: Vec<String>,
    /// 停止失败的服务与原因
    pub stop_errors: Vec<(String, String)>,
    pub backup: Option<PathBuf>,
    pub restore_command: Option<String>,
    pub log_hint: Option<String>,
    pub remediation: Vec<String>,
}

/// 停止本次运行启动的服务并生成报告
pub async fn rollback(
    config: &BootstrapConfig,
    runtime: &dyn ContainerRuntime,
    ledger: &RunLedger,
    failure: &BootstrapError,
) -> RollbackReport {
    let failed_phase = failure.phase();
    warn!(
        phase = %failed_phase,
        services = ledger.started.len(),
        "Rolling back services started by this run"
    );

    let mut stopped = Vec::new();
    let mut stop_errors = Vec::new();
    for name in ledger.started.iter().rev() {
        match runtime.stop(std::slice::from_ref(name)).await {
            Ok(()) => {
                info!(service = %name, "Stopped");
                stopped.push(name.clone());
            }
            Err(e) => {
                error!(service = %name, error = %e, "Failed to stop service during rollback");
                stop_errors.push((name.clone(), e.to_string()));
            }
        }
    }

    if ledger.started.is_empty() {
        info!("No services were started by this run, nothing to stop");
    }

    RollbackReport {
        failed_phase,
        reason: failure.to_string(),
        exit_code: failure.exit_code(),
        stopped,
        stop_errors,
        backup: ledger.backup.as_ref().map(|b| b.path.clone()),
        restore_command: ledger.restore_command.clone(),
        log_hint: failure.hint().map(String::from),
        remediation: remediation(config, runtime, failed_phase),
    }
}

/// 排查清单
fn remediation(config: &BootstrapConfig, runtime: &dyn ContainerRuntime, phase: Phase) -> Vec<String> {
    let compose = runtime.compose_display();
    let mut steps = vec![
        format!("Inspect container state: {} ps -a", compose),
        format!("Read recent logs: {} logs --tail=100", compose),
    ];
    match phase {
        Phase::ImagesBuilt => steps.push(format!("Rebuild with full output: {} build --progress=plain", compose)),
        Phase::InfraUp => steps.push("Check ports and volumes used by the infrastructure services".to_string()),
        Phase::Migrated => steps.push(format!(
            "Check database credentials in {}",
            config.env_file.display()
        )),
        _ => {}
    }
    steps.push(format!(
        "Confirm every required key is set in {}",
        config.env_file.display()
    ));
    steps.push("Check the container daemon: systemctl status docker (or docker info)".to_string());
    steps.push(format!(
        "Check free disk space: df -h {}",
        config.project_dir.display()
    ));
    steps.push("Re-run the bootstrap once the cause is fixed; completed steps are skipped safely".to_string());
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{FakeRuntime, TestProject};

    fn ledger(started: &[&str]) -> RunLedger {
        RunLedger {
            started: started.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_guard() {
        let mut guard = RollbackGuard::default();
        assert!(!guard.is_armed());
        guard.arm();
        assert!(guard.is_armed());
        guard.disarm();
        assert!(!guard.is_armed());
    }

    #[tokio::test]
    async fn test_stops_in_reverse_start_order() {
        let project = TestProject::new();
        let runtime = FakeRuntime::with_running(&["postgres", "redis", "dashboard"]);
        let failure = BootstrapError::stage_with_hint(Phase::AllUp, "dashboard crashed", "logs dashboard");

        let report = rollback(&project.config, &runtime, &ledger(&["postgres", "redis", "dashboard"]), &failure).await;

        assert_eq!(report.stopped, vec!["dashboard", "redis", "postgres"]);
        assert_eq!(report.exit_code, 70);
        assert_eq!(report.log_hint.as_deref(), Some("logs dashboard"));
        assert!(runtime.state().running.is_empty());
    }

    #[tokio::test]
    async fn test_empty_ledger_is_noop() {
        let project = TestProject::new();
        let runtime = FakeRuntime::with_running(&["postgres"]);
        let failure = BootstrapError::stage(Phase::ImagesBuilt, "build failed");

        let report = rollback(&project.config, &runtime, &RunLedger::default(), &failure).await;

        assert!(report.stopped.is_empty());
        assert!(runtime.state().stop_calls.is_empty());
        assert!(runtime.state().running.contains("postgres"));
    }

    #[tokio::test]
    async fn test_stop_errors_are_reported_not_raised() {
        let project = TestProject::new();
        let runtime = FakeRuntime::with_running(&["redis"]);
        runtime.state().stop_fails = true;
        let failure = BootstrapError::Interrupted { phase: Phase::InfraUp };

        let report = rollback(&project.config, &runtime, &ledger(&["redis"]), &failure).await;

        assert!(report.stopped.is_empty());
        assert_eq!(report.stop_errors.len(), 1);
        assert_eq!(report.exit_code, 130);
        assert!(report.remediation.len() >= 3);
    }

    #[tokio::test]
    async fn test_remediation_covers_daemon_and_disk() {
        let project = TestProject::new();
        let runtime = FakeRuntime::new();
        let failure = BootstrapError::stage(Phase::Migrated, "migration exited with 1");

        let report = rollback(&project.config, &runtime, &RunLedger::default(), &failure).await;

        assert!(report.remediation.iter().any(|s| s.contains("systemctl status docker")));
        let disk = format!("df -h {}", project.config.project_dir.display());
        assert!(report.remediation.iter().any(|s| s.contains(&disk)));
        assert!(report.remediation.iter().any(|s| s.contains("logs --tail=100")));
    }
}
