//! 引导编排
//!
//! 顺序执行 Preflight → EnvValidated → BackedUp → ImagesBuilt → InfraUp → Migrated → AllUp → Validated。
//! 每个阶段都与取消令牌竞争，中断按当前阶段失败处理。
//! 回滚保护在第一个变更阶段之前武装，健康验证通过后解除。

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{BootstrapConfig, EnvFile};
use crate::domain::backup::BackupOutcome;
use crate::domain::deploy::{DeploymentState, Phase, PhaseTracker, StageResult};
use crate::domain::summary::{Classification, Summary};
use crate::error::{BootstrapError, BootstrapResult};
use crate::infra::{Confirm, ContainerRuntime, DatabaseAdmin, HealthProbe, HostInspector};

use super::backup::create_backup_point;
use super::env_validator::validate_environment;
use super::health::validate_health;
use super::preflight::run_preflight;
use super::rollback::{rollback, RollbackGuard, RollbackReport};
use super::stages::{RunLedger, StageRunner};
use super::state_store::{StateRecord, StateStore};

/// 以超级用户密码创建数据库管理器（密码在环境校验之后才可用）
pub type DbConnector = Box<dyn Fn(&str) -> Arc<dyn DatabaseAdmin> + Send + Sync>;

/// 外部协作者
pub struct Collaborators {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub connect_db: DbConnector,
    pub probe: Arc<dyn HealthProbe>,
    pub host: Arc<dyn HostInspector>,
    pub prompt: Arc<dyn Confirm>,
}

/// 一次运行的结果
#[derive(Debug)]
pub struct RunOutcome {
    pub state: DeploymentState,
    pub classification: Classification,
    pub summary: Summary,
    /// 最后到达的阶段（失败时为失败前的阶段）
    pub reached: Phase,
    pub failed_phase: Option<Phase>,
    pub expected_services: usize,
    pub running_services: usize,
    pub backup: Option<BackupOutcome>,
    pub error: Option<String>,
    pub hint: Option<String>,
    pub rollback: Option<RollbackReport>,
    pub exit_code: i32,
}

/// 运行过程中累积的状态
#[derive(Default)]
struct Run {
    tracker: PhaseTracker,
    summary: Summary,
    ledger: RunLedger,
    guard: RollbackGuard,
    backup: Option<BackupOutcome>,
}

/// 引导编排器
pub struct Bootstrap {
    config: BootstrapConfig,
    deps: Collaborators,
    store: StateStore,
}

impl Bootstrap {
    pub fn new(config: BootstrapConfig, deps: Collaborators) -> Self {
        let store = StateStore::new(config.state_dir.clone());
        Self {
            config,
            deps,
            store,
        }
    }

    /// 执行完整流水线
    pub async fn run(&self, cancel: CancellationToken) -> RunOutcome {
        info!(
            project = %self.config.project_dir.display(),
            services = self.config.expected_services(),
            "Starting bootstrap"
        );

        let mut run = Run::default();
        match self.pipeline(&mut run, &cancel).await {
            Ok(()) => self.finish_success(run).await,
            Err(e) => self.finish_failure(run, e).await,
        }
    }

    async fn pipeline(&self, run: &mut Run, cancel: &CancellationToken) -> BootstrapResult<()> {
        let runtime = self.deps.runtime.as_ref();

        // 预检
        let results = interruptible(
            cancel,
            Phase::Preflight,
            run_preflight(
                &self.config,
                runtime,
                self.deps.host.as_ref(),
                self.deps.prompt.as_ref(),
            ),
        )
        .await?;
        run.summary.extend(results);

        // 环境校验
        if cancel.is_cancelled() {
            return Err(BootstrapError::Interrupted {
                phase: Phase::EnvValidated,
            });
        }
        let mut env_file = EnvFile::load(&self.config.env_file)?;
        let env = validate_environment(
            &mut env_file,
            &self.config.required_keys(),
            &self.config.auto_keys,
        )?;
        run.summary.extend(env.results());
        advance(run, Phase::EnvValidated)?;

        let db = (self.deps.connect_db)(env.require(&self.config.db_password_key)?);

        // 备份
        let preexisting = interruptible(cancel, Phase::BackedUp, async {
            runtime
                .running_services()
                .await
                .map_err(|e| BootstrapError::Backup(format!("cannot list running services: {}", e)))
        })
        .await?;
        run.ledger = RunLedger::new(preexisting);

        let outcome = interruptible(
            cancel,
            Phase::BackedUp,
            create_backup_point(&self.config, runtime, db.as_ref()),
        )
        .await?;
        match &outcome {
            BackupOutcome::Created(artifact) => {
                run.ledger.backup = Some(artifact.clone());
                run.ledger.restore_command = Some(db.restore_command(&artifact.path));
                run.summary.record(StageResult::pass(
                    "backup",
                    format!("{} ({} bytes)", artifact.path.display(), artifact.size_bytes),
                ));
            }
            BackupOutcome::Skipped { reason } => {
                run.summary
                    .record(StageResult::pass("backup", format!("skipped: {}", reason)));
            }
        }
        run.backup = Some(outcome);
        advance(run, Phase::BackedUp)?;

        // 变更阶段
        run.guard.arm();
        let runner = StageRunner {
            config: &self.config,
            runtime,
            db: db.as_ref(),
            probe: self.deps.probe.as_ref(),
            env: &env,
        };
        for phase in [Phase::ImagesBuilt, Phase::InfraUp, Phase::Migrated, Phase::AllUp] {
            let results = interruptible(cancel, phase, runner.run(phase, &mut run.ledger)).await?;
            run.summary.extend(results);
            advance(run, phase)?;
        }

        // 健康验证
        let health = interruptible(cancel, Phase::Validated, async {
            Ok(validate_health(
                self.config.manifest.services(),
                self.deps.probe.as_ref(),
                db.as_ref(),
                &self.config.timeouts,
            )
            .await)
        })
        .await?;
        let failed: Vec<String> = health.failures().map(|r| r.name.clone()).collect();
        run.summary.extend(health.results);
        if !failed.is_empty() {
            return Err(BootstrapError::stage_with_hint(
                Phase::Validated,
                format!("critical services failed health checks: {}", failed.join(", ")),
                format!("{} logs --tail=100", runtime.compose_display()),
            ));
        }
        advance(run, Phase::Validated)?;
        run.guard.disarm();

        Ok(())
    }

    async fn finish_success(&self, mut run: Run) -> RunOutcome {
        let running = self.running_count().await;
        let expected = self.config.expected_services();
        if running < expected {
            run.summary.record(StageResult::warn(
                "services_running",
                format!("{}/{} services running", running, expected),
            ));
        }

        let backup_path = run
            .backup
            .as_ref()
            .and_then(|b| b.artifact())
            .map(|a| a.path.clone());
        let record = StateRecord::complete(
            run.summary.classification().as_str(),
            expected,
            running,
            backup_path,
        );
        if let Err(e) = self.store.mark_complete(&record).await {
            warn!(error = %e, "Failed to record completed deployment");
            run.summary
                .record(StageResult::warn("state_record", format!("not written: {}", e)));
        }

        let classification = run.summary.classification();
        info!(
            classification = classification.as_str(),
            running,
            expected,
            "Bootstrap complete"
        );

        RunOutcome {
            state: DeploymentState::Complete,
            classification,
            summary: run.summary,
            reached: run.tracker.current(),
            failed_phase: None,
            expected_services: expected,
            running_services: running,
            backup: run.backup,
            error: None,
            hint: None,
            rollback: None,
            exit_code: 0,
        }
    }

    async fn finish_failure(&self, mut run: Run, err: BootstrapError) -> RunOutcome {
        let reached = run.tracker.current();
        if let Err(e) = run.tracker.fail() {
            warn!(error = %e, "Phase tracker rejected failure transition");
        }
        error!(phase = %err.phase(), error = %err, "Bootstrap failed");
        run.summary
            .record(StageResult::fail(err.phase().as_str(), err.to_string()));

        let report = if run.guard.is_armed() {
            // 主机已被变更，旧的完成记录不再成立
            if let Err(e) = self.store.clear().await {
                warn!(error = %e, "Failed to clear completion record");
            }
            Some(rollback(&self.config, self.deps.runtime.as_ref(), &run.ledger, &err).await)
        } else {
            None
        };

        RunOutcome {
            state: DeploymentState::Failed,
            classification: Classification::Failure,
            summary: run.summary,
            reached,
            failed_phase: Some(err.phase()),
            expected_services: self.config.expected_services(),
            running_services: self.running_count().await,
            backup: run.backup,
            error: Some(err.to_string()),
            hint: err.hint().map(String::from),
            rollback: report,
            exit_code: err.exit_code(),
        }
    }

    /// 清单中正在运行的服务数量
    async fn running_count(&self) -> usize {
        match self.deps.runtime.running_services().await {
            Ok(running) => self
                .config
                .manifest
                .services()
                .iter()
                .filter(|s| running.contains(&s.name))
                .count(),
            Err(e) => {
                warn!(error = %e, "Cannot list running services");
                0
            }
        }
    }
}

fn advance(run: &mut Run, phase: Phase) -> BootstrapResult<()> {
    run.tracker
        .advance(phase)
        .map_err(|e| BootstrapError::stage(phase, e.to_string()))?;
    info!(phase = %phase, "Phase reached");
    Ok(())
}

/// 与取消令牌竞争；取消时以 `phase` 中断
async fn interruptible<T, F>(cancel: &CancellationToken, phase: Phase, fut: F) -> BootstrapResult<T>
where
    F: Future<Output = BootstrapResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(phase = %phase, "Interrupted");
            Err(BootstrapError::Interrupted { phase })
        }
        result = fut => result,
    }
}
