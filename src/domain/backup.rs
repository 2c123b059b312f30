//! 备份产物

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 持久状态的逻辑快照，归创建它的那次运行所有，无限期保留
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// 被快照的服务
    pub source_service: String,
    /// 文件内容的 SHA-256
    pub sha256: String,
}

/// 备份协调器的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(BackupArtifact),
    /// 没有可备份的已有状态（不是失败）
    Skipped { reason: String },
}

impl BackupOutcome {
    pub fn artifact(&self) -> Option<&BackupArtifact> {
        match self {
            BackupOutcome::Created(artifact) => Some(artifact),
            BackupOutcome::Skipped { .. } => None,
        }
    }
}

/// 按可排序时间戳生成备份文件名
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("homelab-backup-{}.sql", at.format("%Y%m%d-%H%M%S"))
}
