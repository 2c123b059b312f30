//! 备份协调
//!
//! 在任何变更前为已有的数据库状态创建恢复点。
//! 备份可能包含凭据或个人数据：目录 0700，文件在写入任何字节前即为 0600。

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Read;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::BootstrapConfig;
use crate::domain::backup::{backup_file_name, BackupArtifact, BackupOutcome};
use crate::error::{BootstrapError, BootstrapResult};
use crate::infra::{ContainerRuntime, DatabaseAdmin};

/// 创建备份点
///
/// 数据库服务未运行时返回 `Skipped`（全新主机没有可备份的状态）。
pub async fn create_backup_point(
    config: &BootstrapConfig,
    runtime: &dyn ContainerRuntime,
    db: &dyn DatabaseAdmin,
) -> BootstrapResult<BackupOutcome> {
    let running = runtime
        .running_services()
        .await
        .map_err(|e| BootstrapError::Backup(format!("cannot list running services: {}", e)))?;

    if !running.contains(&config.db_service) {
        info!(service = %config.db_service, "Database not running, skipping backup");
        return Ok(BackupOutcome::Skipped {
            reason: format!("{} not running, no prior state", config.db_service),
        });
    }

    prepare_backup_dir(&config.backup_dir)
        .map_err(|e| BootstrapError::Backup(format!("cannot prepare backup directory: {}", e)))?;

    let created_at = Utc::now();
    let path = config.backup_dir.join(backup_file_name(created_at));
    let file = create_private_file(&path)
        .map_err(|e| BootstrapError::Backup(format!("cannot create {}: {}", path.display(), e)))?;
    let pending = PendingBackup::new(path);

    info!(path = %pending.path.display(), service = %config.db_service, "Creating database backup");

    db.dump_all(file)
        .await
        .map_err(|e| BootstrapError::Backup(format!("database dump failed: {}", e)))?;

    let size_bytes = fs::metadata(&pending.path).map(|m| m.len()).unwrap_or(0);
    if size_bytes == 0 {
        return Err(BootstrapError::Backup(
            "database dump produced an empty file".to_string(),
        ));
    }

    let sha256 = file_sha256(&pending.path)
        .map_err(|e| BootstrapError::Backup(format!("cannot checksum backup: {}", e)))?;
    let path = pending.commit();

    info!(
        path = %path.display(),
        size_bytes,
        sha256 = %sha256,
        "Backup created"
    );

    Ok(BackupOutcome::Created(BackupArtifact {
        path,
        size_bytes,
        created_at,
        source_service: config.db_service.clone(),
        sha256,
    }))
}

/// 创建备份目录并收紧为 0700（已存在时也重新设置）
fn prepare_backup_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

/// 以 0600 新建文件，已存在则失败
fn create_private_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path)
}

/// 写入中的备份文件
///
/// 未 `commit` 就被丢弃时删除文件，包括外层 future 因中断被 drop 的情况，
/// 目录里只留下完整的恢复点。
struct PendingBackup {
    path: PathBuf,
    committed: bool,
}

impl PendingBackup {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingBackup {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => warn!(path = %self.path.display(), "Removed partial backup"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove partial backup"),
        }
    }
}

/// 计算文件 SHA-256
fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
