//! 阶段执行器
//!
//! 依次执行会变更主机状态的阶段：构建镜像、启动基础设施、迁移、启动全部服务。
//! 每个阶段都是幂等的，在已经达到期望状态的主机上重复执行视为成功。
//! `RunLedger` 记录本次运行启动了哪些服务，供回滚精确停止。

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BootstrapConfig;
use crate::domain::backup::BackupArtifact;
use crate::domain::deploy::{Phase, StageResult};
use crate::domain::service::{Readiness, ServiceDescriptor};
use crate::error::{BootstrapError, BootstrapResult};
use crate::infra::{ContainerRuntime, DatabaseAdmin, ExecRequest, HealthProbe};

use super::env_validator::ValidatedEnv;

/// 本次运行的变更记录
#[derive(Clone, Debug, Default)]
pub struct RunLedger {
    /// 本次运行开始前已在运行的服务
    pub preexisting: BTreeSet<String>,
    /// 本次运行启动的服务（按启动顺序）
    pub started: Vec<String>,
    /// 本次运行创建的备份
    pub backup: Option<BackupArtifact>,
    /// 恢复该备份的命令
    pub restore_command: Option<String>,
}

impl RunLedger {
    pub fn new(preexisting: BTreeSet<String>) -> Self {
        Self {
            preexisting,
            ..Default::default()
        }
    }

    /// 在发出启动命令之前记录；之前已在运行的服务不记录
    pub fn record_started(&mut self, services: &[String]) {
        for name in services {
            if !self.preexisting.contains(name) && !self.started.contains(name) {
                self.started.push(name.clone());
            }
        }
    }
}

/// 阶段执行器
pub struct StageRunner<'a> {
    pub config: &'a BootstrapConfig,
    pub runtime: &'a dyn ContainerRuntime,
    pub db: &'a dyn DatabaseAdmin,
    pub probe: &'a dyn HealthProbe,
    pub env: &'a ValidatedEnv,
}

impl<'a> StageRunner<'a> {
    /// 执行到达 `phase` 所需的阶段
    pub async fn run(&self, phase: Phase, ledger: &mut RunLedger) -> BootstrapResult<Vec<StageResult>> {
        info!(phase = %phase, "Running stage: {}", phase.display_name());
        match phase {
            Phase::ImagesBuilt => self.build_images().await,
            Phase::InfraUp => self.start_infrastructure(ledger).await,
            Phase::Migrated => self.migrate().await,
            Phase::AllUp => self.start_all(ledger).await,
            other => Err(BootstrapError::stage(
                other,
                format!("{} is not a stage runner phase", other),
            )),
        }
    }

    /// 构建有本地构建上下文的镜像
    async fn build_images(&self) -> BootstrapResult<Vec<StageResult>> {
        let started = Instant::now();
        let services: Vec<String> = self
            .config
            .manifest
            .services()
            .iter()
            .filter(|s| s.build)
            .map(|s| s.name.clone())
            .collect();

        if self.config.skip_build {
            return Ok(vec![StageResult::warn("build", "skipped (--skip-build)")]);
        }
        if services.is_empty() {
            return Ok(vec![StageResult::pass("build", "no local images to build")]);
        }

        self.runtime.build(&services).await.map_err(|e| {
            BootstrapError::stage_with_hint(
                Phase::ImagesBuilt,
                e.to_string(),
                format!(
                    "{} build --progress=plain {}",
                    self.runtime.compose_display(),
                    services.join(" ")
                ),
            )
        })?;

        Ok(vec![StageResult::pass(
            "build",
            format!("built {}", services.join(", ")),
        )
        .timed(started)])
    }

    /// 逐个启动基础设施并等待就绪，后一个服务只在前一个就绪后启动
    async fn start_infrastructure(&self, ledger: &mut RunLedger) -> BootstrapResult<Vec<StageResult>> {
        let mut results = Vec::new();

        for svc in self.config.manifest.infrastructure() {
            let started = Instant::now();
            let names = vec![svc.name.clone()];
            ledger.record_started(&names);

            self.runtime.start(&names).await.map_err(|e| {
                BootstrapError::stage_with_hint(
                    Phase::InfraUp,
                    format!("failed to start {}: {}", svc.name, e),
                    self.runtime.logs_command(&svc.name),
                )
            })?;

            let waited = self.wait_ready(svc).await?;
            info!(service = %svc.name, waited_ms = waited.as_millis() as u64, "Infrastructure service ready");
            results.push(
                StageResult::pass(
                    format!("ready:{}", svc.name),
                    format!("ready after {:.1}s", waited.as_secs_f64()),
                )
                .timed(started),
            );
        }

        Ok(results)
    }

    /// 有上限地轮询就绪探测
    async fn wait_ready(&self, svc: &ServiceDescriptor) -> BootstrapResult<Duration> {
        let timeout = self.config.timeouts.infra_ready;
        let poll = self.config.timeouts.ready_poll;
        let started = Instant::now();

        loop {
            // 单次探测也受剩余时间约束
            let remaining = timeout.saturating_sub(started.elapsed());
            let ready = tokio::time::timeout(remaining, self.is_ready(svc))
                .await
                .unwrap_or(false);
            if ready {
                return Ok(started.elapsed());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!(service = %svc.name, timeout = ?timeout, "Service did not become ready");
                return Err(BootstrapError::stage_with_hint(
                    Phase::InfraUp,
                    format!("{} did not become ready within {:?}", svc.name, timeout),
                    self.runtime.logs_command(&svc.name),
                ));
            }
            tokio::time::sleep(poll.min(timeout - elapsed)).await;
        }
    }

    async fn is_ready(&self, svc: &ServiceDescriptor) -> bool {
        match &svc.readiness {
            Readiness::Command { argv } => self
                .runtime
                .exec(&svc.name, ExecRequest::new(argv.iter().cloned()))
                .await
                .map(|out| out.success())
                .unwrap_or(false),
            Readiness::Http { url } => self
                .probe
                .status(url)
                .await
                .map(|status| svc.accepts(status))
                .unwrap_or(false),
            Readiness::Running => self
                .runtime
                .running_services()
                .await
                .map(|running| running.contains(&svc.name))
                .unwrap_or(false),
        }
    }

    /// 幂等地准备角色与数据库，然后对主数据库执行迁移
    async fn migrate(&self) -> BootstrapResult<Vec<StageResult>> {
        let mut results = Vec::new();
        let db_hint = self.runtime.logs_command(&self.config.db_service);

        for svc in self.config.manifest.services() {
            let Some(spec) = &svc.database else {
                continue;
            };
            let started = Instant::now();
            let password = self.env.require(&spec.password_key)?;

            let role = self.db.ensure_role(&spec.user, password).await.map_err(|e| {
                BootstrapError::stage_with_hint(
                    Phase::Migrated,
                    format!("cannot provision role {}: {}", spec.user, e),
                    db_hint.clone(),
                )
            })?;
            let database = self
                .db
                .ensure_database(&spec.name, &spec.user)
                .await
                .map_err(|e| {
                    BootstrapError::stage_with_hint(
                        Phase::Migrated,
                        format!("cannot provision database {}: {}", spec.name, e),
                        db_hint.clone(),
                    )
                })?;

            results.push(
                StageResult::pass(
                    format!("provision:{}", spec.name),
                    format!("role {}, database {}", role.as_str(), database.as_str()),
                )
                .timed(started),
            );
        }

        let Some(primary) = self.config.manifest.primary() else {
            return Ok(results);
        };
        let started = Instant::now();

        if let Some(spec) = &primary.database {
            let tables = self.db.count_tables(&spec.name).await.map_err(|e| {
                BootstrapError::stage_with_hint(
                    Phase::Migrated,
                    format!("cannot inspect {}: {}", spec.name, e),
                    db_hint.clone(),
                )
            })?;
            if tables == 0 {
                warn!(database = %spec.name, "No tables yet, treating as first run");
                results.push(StageResult::warn(
                    format!("schema:{}", spec.name),
                    "no existing tables (first run)",
                ));
            } else {
                results.push(StageResult::pass(
                    format!("schema:{}", spec.name),
                    format!("{} existing tables", tables),
                ));
            }
        }

        let Some(command) = &primary.migrate_command else {
            results.push(StageResult::warn(
                format!("migrate:{}", primary.name),
                "no migration command configured",
            ));
            return Ok(results);
        };

        info!(service = %primary.name, command = ?command, "Applying schema migrations");
        let migrate_hint = format!(
            "{} run --rm {} {}",
            self.runtime.compose_display(),
            primary.name,
            command.join(" ")
        );
        let output = self
            .runtime
            .run_oneoff(&primary.name, command)
            .await
            .map_err(|e| {
                BootstrapError::stage_with_hint(Phase::Migrated, e.to_string(), migrate_hint.clone())
            })?;
        if !output.success() {
            return Err(BootstrapError::stage_with_hint(
                Phase::Migrated,
                format!(
                    "migration exited with code {:?}: {}",
                    output.code,
                    tail(&output.stderr, 5)
                ),
                migrate_hint,
            ));
        }

        results.push(
            StageResult::pass(format!("migrate:{}", primary.name), "migrations applied").timed(started),
        );
        Ok(results)
    }

    /// 启动其余服务并等待稳定窗口
    async fn start_all(&self, ledger: &mut RunLedger) -> BootstrapResult<Vec<StageResult>> {
        let started = Instant::now();
        let services: Vec<String> = self
            .config
            .manifest
            .applications()
            .map(|s| s.name.clone())
            .collect();

        ledger.record_started(&services);
        self.runtime.start(&services).await.map_err(|e| {
            BootstrapError::stage_with_hint(
                Phase::AllUp,
                e.to_string(),
                format!("{} ps && {} logs --tail=100", self.runtime.compose_display(), self.runtime.compose_display()),
            )
        })?;

        let mut results = vec![StageResult::pass(
            "start_all",
            format!("started {}", services.join(", ")),
        )
        .timed(started)];

        let window = self.config.timeouts.stabilize;
        if !window.is_zero() {
            let started = Instant::now();
            stabilize(window, !self.config.non_interactive).await;
            results.push(
                StageResult::pass("stabilize", format!("waited {}s", window.as_secs())).timed(started),
            );
        }

        Ok(results)
    }
}

/// 等待慢启动的 worker，显示进度
async fn stabilize(window: Duration, show_progress: bool) {
    let total = window.as_secs().max(1);
    let bar = if show_progress {
        ProgressBar::new(total)
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::with_template("{spinner} stabilizing [{bar:30}] {pos}/{len}s") {
        bar.set_style(style);
    }

    info!(seconds = total, "Waiting for services to stabilize");
    let started = Instant::now();
    let mut last_logged = 0;
    loop {
        let elapsed = started.elapsed();
        if elapsed >= window {
            break;
        }
        let step = Duration::from_secs(1).min(window - elapsed);
        tokio::time::sleep(step).await;

        let secs = started.elapsed().as_secs().min(total);
        bar.set_position(secs);
        if secs >= last_logged + 15 {
            last_logged = secs;
            info!(elapsed = secs, total, "Stabilizing");
        }
    }
    bar.finish_and_clear();
}

/// 最后 n 行
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}
