//! 统一错误处理
//!
//! `BootstrapError` 覆盖引导流程中的全部致命错误，并映射到进程退出码。
//! 预检、环境校验、备份失败发生在任何变更之前，可以直接退出；
//! 阶段失败和中断则需要经过回滚控制器。

use thiserror::Error;

use crate::domain::deploy::Phase;
use crate::domain::validation::ValidationIssue;

/// 引导错误
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// 主机能力不足（运行时缺失、配置文件缺失等）
    #[error("preflight check '{check}' failed: {reason}")]
    Preflight {
        check: String,
        reason: String,
        hint: String,
    },

    /// 操作员拒绝在软检查警告后继续
    #[error("preflight aborted by operator after '{check}' warning")]
    PreflightDeclined { check: String },

    /// 缺少关键配置项（列出全部，而不仅是第一个）
    #[error("missing required configuration: {}", format_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    /// 无法对已有状态做快照
    #[error("backup failed: {0}")]
    Backup(String),

    /// 变更已开始后的阶段失败
    #[error("stage {phase} failed: {reason}")]
    Stage {
        phase: Phase,
        reason: String,
        log_hint: Option<String>,
    },

    /// 操作员中断（Ctrl-C），视为当前阶段失败
    #[error("interrupted during {phase}")]
    Interrupted { phase: Phase },

    /// 配置本身无效（服务清单错误等）
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootstrapError {
    /// 创建预检失败
    pub fn preflight(
        check: impl Into<String>,
        reason: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self::Preflight {
            check: check.into(),
            reason: reason.into(),
            hint: hint.into(),
        }
    }

    /// 创建阶段失败
    pub fn stage(phase: Phase, reason: impl Into<String>) -> Self {
        Self::Stage {
            phase,
            reason: reason.into(),
            log_hint: None,
        }
    }

    /// 创建附带日志排查命令的阶段失败
    pub fn stage_with_hint(phase: Phase, reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Stage {
            phase,
            reason: reason.into(),
            log_hint: Some(hint.into()),
        }
    }

    /// 错误发生时所处的阶段
    pub fn phase(&self) -> Phase {
        match self {
            Self::Preflight { .. } | Self::PreflightDeclined { .. } | Self::Config(_) => {
                Phase::Preflight
            }
            Self::Validation { .. } => Phase::EnvValidated,
            Self::Backup(_) => Phase::BackedUp,
            Self::Stage { phase, .. } | Self::Interrupted { phase } => *phase,
            Self::Io(_) => Phase::Preflight,
        }
    }

    /// 是否发生在任何变更之前（无需回滚）
    pub fn is_pre_mutation(&self) -> bool {
        match self {
            Self::Stage { phase, .. } | Self::Interrupted { phase } => !phase.is_mutating(),
            _ => true,
        }
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupted { .. } => 130,
            Self::Io(_) => 1,
            other => other.phase().exit_code(),
        }
    }

    /// 排查提示（如有）
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Preflight { hint, .. } => Some(hint),
            Self::Stage { log_hint, .. } => log_hint.as_deref(),
            _ => None,
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.variable.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 便捷类型别名
pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::validation::Severity;

    #[test]
    fn test_validation_lists_every_key() {
        let err = BootstrapError::Validation {
            issues: vec![
                ValidationIssue::new("WEB_PASSWORD", Severity::MissingCritical),
                ValidationIssue::new("SESSION_SECRET", Severity::MissingCritical),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("WEB_PASSWORD"));
        assert!(msg.contains("SESSION_SECRET"));
        assert_eq!(err.exit_code(), 20);
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_stage_error_codes() {
        assert_eq!(BootstrapError::stage(Phase::InfraUp, "timeout").exit_code(), 50);
        assert_eq!(BootstrapError::stage(Phase::Migrated, "x").exit_code(), 60);
        assert_eq!(BootstrapError::Interrupted { phase: Phase::AllUp }.exit_code(), 130);
        assert!(!BootstrapError::stage(Phase::ImagesBuilt, "x").is_pre_mutation());
        assert!(BootstrapError::Backup("disk full".into()).is_pre_mutation());
    }

    #[test]
    fn test_stage_hint() {
        let err = BootstrapError::stage_with_hint(
            Phase::InfraUp,
            "postgres not ready",
            "docker compose logs postgres",
        );
        assert_eq!(err.hint(), Some("docker compose logs postgres"));
    }
}
