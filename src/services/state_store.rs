//! 部署状态持久化
//!
//! 仅在运行以成功终态结束时写入 `bootstrap-state.json`。
//! 没有该文件意味着上次运行失败或从未完成。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::config::env::constants::VERSION;
use crate::domain::deploy::DeploymentState;

/// 状态文件名
const STATE_FILE_NAME: &str = "bootstrap-state.json";

/// 持久化的部署记录
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    /// 格式版本
    pub format: u32,
    pub state: DeploymentState,
    pub completed_at: DateTime<Utc>,
    /// 写入该记录的工具版本
    pub tool_version: String,
    pub hostname: String,
    /// success / success_with_warnings
    pub classification: String,
    pub expected_services: usize,
    pub running_services: usize,
    /// 本次运行创建的备份
    pub backup: Option<PathBuf>,
}

impl StateRecord {
    /// 成功终态记录
    pub fn complete(
        classification: &str,
        expected_services: usize,
        running_services: usize,
        backup: Option<PathBuf>,
    ) -> Self {
        Self {
            format: 1,
            state: DeploymentState::Complete,
            completed_at: Utc::now(),
            tool_version: VERSION.to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            classification: classification.to_string(),
            expected_services,
            running_services,
            backup,
        }
    }
}

/// 状态目录中的记录存取
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    /// 读取记录；文件不存在或无法解析时返回 None
    pub async fn load(&self) -> Option<StateRecord> {
        let path = self.path();
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<StateRecord>(&content) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse state record, ignoring");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read state record");
                None
            }
        }
    }

    /// 写入完成记录（原子写入）
    pub async fn mark_complete(&self, record: &StateRecord) -> anyhow::Result<()> {
        let path = self.path();
        let temp_path = path.with_extension("json.tmp");

        fs::create_dir_all(&self.dir).await?;
        restrict_dir(&self.dir).await?;

        let content = serde_json::to_string_pretty(record)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        info!(
            path = %path.display(),
            classification = %record.classification,
            "Recorded completed deployment"
        );
        Ok(())
    }

    /// 删除完成记录
    pub async fn clear(&self) -> anyhow::Result<()> {
        let path = self.path();
        if path.exists() {
            fs::remove_file(&path).await?;
            info!(path = %path.display(), "Cleared completion record");
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn restrict_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_mark_complete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        let record = StateRecord::complete("success", 6, 6, None);

        store.mark_complete(&record).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.state, DeploymentState::Complete);
        assert!(!store.path().with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("state")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.clear().await.unwrap();
        store
            .mark_complete(&StateRecord::complete("success", 1, 1, None))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().await.is_none());
    }
}
