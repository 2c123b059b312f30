//! 配置校验问题

use serde::Serialize;
use std::fmt;

/// 问题严重程度
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// 缺少关键配置，终止运行
    MissingCritical,
    /// 缺少可选配置，自动补全或仅报告
    MissingOptional,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub variable: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(variable: impl Into<String>, severity: Severity) -> Self {
        Self {
            variable: variable.into(),
            severity,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::MissingCritical
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::MissingCritical => write!(f, "{} (required)", self.variable),
            Severity::MissingOptional => write!(f, "{} (optional, left blank)", self.variable),
        }
    }
}
