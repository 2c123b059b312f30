//! 部署流程相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// 部署状态标记
///
/// 仅在终态成功时以 `Complete` 持久化；不存在记录意味着上次运行失败或从未完成。
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl DeploymentState {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::NotStarted => "not_started",
            DeploymentState::InProgress => "in_progress",
            DeploymentState::Complete => "complete",
            DeploymentState::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Complete | DeploymentState::Failed)
    }
}

/// 流水线阶段
///
/// 严格顺序推进：不可跳过，不可回到之前的阶段。`Failed` 可从任意非终态到达。
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    EnvValidated,
    BackedUp,
    ImagesBuilt,
    InfraUp,
    Migrated,
    AllUp,
    Validated,
    Failed,
}

impl Phase {
    /// 下一个阶段（终态返回 None）
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Preflight => Some(Phase::EnvValidated),
            Phase::EnvValidated => Some(Phase::BackedUp),
            Phase::BackedUp => Some(Phase::ImagesBuilt),
            Phase::ImagesBuilt => Some(Phase::InfraUp),
            Phase::InfraUp => Some(Phase::Migrated),
            Phase::Migrated => Some(Phase::AllUp),
            Phase::AllUp => Some(Phase::Validated),
            Phase::Validated | Phase::Failed => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Validated | Phase::Failed)
    }

    /// 到达该阶段的过程是否处于回滚保护范围内（变更已开始）
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Phase::ImagesBuilt | Phase::InfraUp | Phase::Migrated | Phase::AllUp | Phase::Validated
        )
    }

    /// 在该阶段失败时的退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Phase::Preflight => 10,
            Phase::EnvValidated => 20,
            Phase::BackedUp => 30,
            Phase::ImagesBuilt => 40,
            Phase::InfraUp => 50,
            Phase::Migrated => 60,
            Phase::AllUp => 70,
            Phase::Validated => 80,
            Phase::Failed => 1,
        }
    }

    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::EnvValidated => "env_validated",
            Phase::BackedUp => "backed_up",
            Phase::ImagesBuilt => "images_built",
            Phase::InfraUp => "infra_up",
            Phase::Migrated => "migrated",
            Phase::AllUp => "all_up",
            Phase::Validated => "validated",
            Phase::Failed => "failed",
        }
    }

    /// 显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Preflight => "Preflight",
            Phase::EnvValidated => "Validate Environment",
            Phase::BackedUp => "Backup",
            Phase::ImagesBuilt => "Build Images",
            Phase::InfraUp => "Start Infrastructure",
            Phase::Migrated => "Migrate",
            Phase::AllUp => "Start All Services",
            Phase::Validated => "Validate Health",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 非法的阶段迁移
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal phase transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// 阶段追踪器（状态机本体）
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: Phase,
    /// 进入每个阶段的时间
    history: Vec<(Phase, DateTime<Utc>)>,
}

impl PhaseTracker {
    /// 从 `Preflight` 开始
    pub fn new() -> Self {
        Self {
            current: Phase::Preflight,
            history: vec![(Phase::Preflight, Utc::now())],
        }
    }

    /// 当前阶段
    pub fn current(&self) -> Phase {
        self.current
    }

    /// 当前阶段之后将要尝试的阶段
    pub fn pending(&self) -> Option<Phase> {
        self.current.next()
    }

    /// 推进到下一阶段，只接受 `current.next()`
    pub fn advance(&mut self, to: Phase) -> Result<Phase, TransitionError> {
        if self.current.next() != Some(to) {
            return Err(TransitionError {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.history.push((to, Utc::now()));
        Ok(to)
    }

    /// 进入失败终态，返回失败前所处的阶段
    pub fn fail(&mut self) -> Result<Phase, TransitionError> {
        if self.current.is_terminal() {
            return Err(TransitionError {
                from: self.current,
                to: Phase::Failed,
            });
        }
        let from = self.current;
        self.current = Phase::Failed;
        self.history.push((Phase::Failed, Utc::now()));
        Ok(from)
    }

    /// 已经历的阶段
    pub fn history(&self) -> &[(Phase, DateTime<Utc>)] {
        &self.history
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 阶段结果状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pass,
    Warn,
    Fail,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Pass => "✓",
            StageStatus::Warn => "⚠",
            StageStatus::Fail => "✗",
        }
    }
}

/// 单项检查/步骤的结果，仅存在于本次运行的内存与日志中
#[derive(Clone, Debug, PartialEq)]
pub struct StageResult {
    /// 检查名称 (e.g., "disk_space", "ready:postgres")
    pub name: String,
    pub status: StageStatus,
    /// 附加信息
    pub detail: String,
    pub duration: Duration,
}

impl StageResult {
    pub fn new(name: impl Into<String>, status: StageStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, StageStatus::Pass, detail)
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, StageStatus::Warn, detail)
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, StageStatus::Fail, detail)
    }

    /// 记录从 `started` 起的耗时
    pub fn timed(mut self, started: Instant) -> Self {
        self.duration = started.elapsed();
        self
    }

    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}
