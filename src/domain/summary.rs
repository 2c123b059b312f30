//! 运行汇总
//!
//! 以值的方式在流水线中累积与传递，不使用全局计数器。

use serde::Serialize;

use super::deploy::{StageResult, StageStatus};

/// 终态分类
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    SuccessWithWarnings,
    Failure,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::SuccessWithWarnings => "success_with_warnings",
            Classification::Failure => "failure",
        }
    }

    /// 成功（含带警告的成功）时进程以 0 退出
    pub fn is_success(&self) -> bool {
        !matches!(self, Classification::Failure)
    }
}

/// 结果汇总
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub results: Vec<StageResult>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条结果
    pub fn record(&mut self, result: StageResult) {
        match result.status {
            StageStatus::Pass => self.passed += 1,
            StageStatus::Warn => self.warned += 1,
            StageStatus::Fail => self.failed += 1,
        }
        self.results.push(result);
    }

    /// 批量记录
    pub fn extend(&mut self, results: impl IntoIterator<Item = StageResult>) {
        for result in results {
            self.record(result);
        }
    }

    /// 合并另一份汇总
    pub fn merge(mut self, other: Summary) -> Self {
        self.extend(other.results);
        self
    }

    /// 零失败零警告 → 成功；零失败有警告 → 带警告成功；任何失败 → 失败
    pub fn classification(&self) -> Classification {
        if self.failed > 0 {
            Classification::Failure
        } else if self.warned > 0 {
            Classification::SuccessWithWarnings
        } else {
            Classification::Success
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| r.status == StageStatus::Warn)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| r.status == StageStatus::Fail)
    }
}
