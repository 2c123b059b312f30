//! 主机资源检查

use std::path::Path;
use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};

/// 字节换算为 GB
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}

/// 主机检查接口（只读）
pub trait HostInspector: Send + Sync {
    /// `path` 所在文件系统的可用空间
    fn free_disk_bytes(&self, path: &Path) -> Option<u64>;
    /// 可用内存
    fn available_memory_bytes(&self) -> u64;
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// 基于 sysinfo 的实现
pub struct SystemHost;

impl HostInspector for SystemHost {
    fn free_disk_bytes(&self, path: &Path) -> Option<u64> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        // 选择挂载点是目标路径最长前缀的磁盘
        disks
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }

    fn available_memory_bytes(&self) -> u64 {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();
        sys.available_memory()
    }
}
