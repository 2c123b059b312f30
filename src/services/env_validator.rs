//! 环境校验
//!
//! 确认配置源包含全部必需键，并为缺失的服务间令牌自动生成随机值。
//! 追加生成的键是本组件唯一的写操作，已有值从不覆盖。

use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::config::EnvFile;
use crate::domain::deploy::StageResult;
use crate::domain::validation::{Severity, ValidationIssue};
use crate::error::{BootstrapError, BootstrapResult};

/// 生成密钥的字节数（256 bit）
const SECRET_BYTES: usize = 32;

/// 校验通过后的配置值
#[derive(Clone, Debug)]
pub struct ValidatedEnv {
    values: BTreeMap<String, String>,
    /// 本次生成的键
    pub generated: Vec<String>,
    /// 非致命问题
    pub issues: Vec<ValidationIssue>,
}

impl ValidatedEnv {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// 必需键的值；校验通过后一定存在
    pub fn require(&self, key: &str) -> BootstrapResult<&str> {
        self.get(key).ok_or_else(|| BootstrapError::Validation {
            issues: vec![ValidationIssue::new(key, Severity::MissingCritical)],
        })
    }

    /// 转换为阶段结果
    pub fn results(&self) -> Vec<StageResult> {
        let mut results = vec![StageResult::pass(
            "required_keys",
            format!("{} keys present", self.values.len()),
        )];
        for key in &self.generated {
            results.push(StageResult::pass(
                format!("generated:{}", key),
                "generated 256-bit secret",
            ));
        }
        for issue in &self.issues {
            results.push(StageResult::warn(
                format!("optional:{}", issue.variable),
                issue.to_string(),
            ));
        }
        results
    }
}

/// 生成 256 bit 随机密钥（hex 编码）
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 校验配置源
///
/// 先检查全部必需键，再补全自动生成的键；存在关键缺失时一次性返回全部缺失项。
pub fn validate_environment(
    env_file: &mut EnvFile,
    required_keys: &BTreeSet<String>,
    auto_keys: &[String],
) -> BootstrapResult<ValidatedEnv> {
    let mut issues = Vec::new();

    for key in required_keys {
        if env_file.is_blank(key) {
            warn!(key = %key, "Required configuration key missing");
            issues.push(ValidationIssue::new(key.clone(), Severity::MissingCritical));
        }
    }

    let mut generated = Vec::new();
    for key in auto_keys {
        if !env_file.contains(key) {
            let secret = generate_secret();
            if env_file.append(key, &secret)? {
                info!(key = %key, "Generated missing secret");
                generated.push(key.clone());
            }
        } else if env_file.is_blank(key) {
            // 空值视为已存在，只报告不改写
            issues.push(ValidationIssue::new(key.clone(), Severity::MissingOptional));
        }
    }

    let critical: Vec<ValidationIssue> = issues.iter().filter(|i| i.is_critical()).cloned().collect();
    if !critical.is_empty() {
        return Err(BootstrapError::Validation { issues: critical });
    }

    let values = required_keys
        .iter()
        .chain(auto_keys.iter())
        .filter_map(|k| env_file.get(k).map(|v| (k.clone(), v.to_string())))
        .collect();

    Ok(ValidatedEnv {
        values,
        generated,
        issues,
    })
}
