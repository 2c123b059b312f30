//! 运行配置加载
//!
//! 整次运行只加载一次，之后以引用传给每个组件。
//! 优先级：内置默认值 < 环境变量 < 命令行参数。

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::services::ServiceManifest;
use crate::error::BootstrapResult;

/// 始终必需的配置键
pub const BASE_REQUIRED_KEYS: &[&str] = &[
    "POSTGRES_PASSWORD",
    "WEB_USERNAME",
    "WEB_PASSWORD",
    "SESSION_SECRET",
];

/// 缺失时自动生成的服务间认证令牌
pub const DEFAULT_AUTO_KEYS: &[&str] = &["SERVICE_AUTH_TOKEN"];

/// 各类等待的上限
#[derive(Clone, Debug)]
pub struct Timeouts {
    /// 基础设施就绪等待上限
    pub infra_ready: Duration,
    /// 就绪探测间隔
    pub ready_poll: Duration,
    /// 全部服务启动后的稳定窗口
    pub stabilize: Duration,
    /// 健康探测最大次数
    pub health_attempts: u32,
    /// 健康探测重试间隔
    pub health_backoff: Duration,
    /// 单个 HTTP 探测请求超时
    pub probe_request: Duration,
    /// 构建、启动等外部命令超时
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            infra_ready: Duration::from_secs(60),
            ready_poll: Duration::from_secs(2),
            stabilize: Duration::from_secs(75),
            health_attempts: 5,
            health_backoff: Duration::from_secs(3),
            probe_request: Duration::from_secs(5),
            command: Duration::from_secs(constants::COMMAND_TIMEOUT_SECS),
        }
    }
}

/// 引导配置
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub project_dir: PathBuf,
    /// `.env` 配置源
    pub env_file: PathBuf,
    pub compose_file: PathBuf,
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// 最小可用磁盘 (GB)
    pub min_disk_gb: f64,
    /// 最小可用内存 (GB)
    pub min_memory_gb: f64,
    pub timeouts: Timeouts,
    /// 非交互模式：软检查失败只记警告
    pub non_interactive: bool,
    pub skip_build: bool,
    /// 数据库服务与超级用户
    pub db_service: String,
    pub db_superuser: String,
    pub db_password_key: String,
    /// 自动生成的键
    pub auto_keys: Vec<String>,
    pub manifest: ServiceManifest,
}

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub project_dir: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub compose_file: Option<PathBuf>,
    pub services_file: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub non_interactive: bool,
    pub skip_build: bool,
}

impl BootstrapConfig {
    /// 从进程环境变量加载配置
    pub fn from_env(overrides: ConfigOverrides) -> BootstrapResult<Self> {
        Self::from_lookup(|key| env::var(key).ok(), overrides)
    }

    /// 从任意键值来源加载配置
    pub fn from_lookup<F>(lookup: F, overrides: ConfigOverrides) -> BootstrapResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_f64 = |key: &str, default: f64| {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_secs = |key: &str, default: Duration| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let project_dir = overrides
            .project_dir
            .clone()
            .or_else(|| get("BOOTSTRAP_PROJECT_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        let path_setting = |cli: Option<PathBuf>, key: &str, default: &str| {
            let path = cli
                .or_else(|| get(key).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(default));
            resolve(&project_dir, path)
        };

        let env_file = path_setting(overrides.env_file.clone(), "BOOTSTRAP_ENV_FILE", ".env");
        let compose_file = path_setting(
            overrides.compose_file.clone(),
            "BOOTSTRAP_COMPOSE_FILE",
            "docker-compose.yml",
        );
        let state_dir = path_setting(overrides.state_dir.clone(), "BOOTSTRAP_STATE_DIR", "var/state");
        let backup_dir = path_setting(
            overrides.backup_dir.clone(),
            "BOOTSTRAP_BACKUP_DIR",
            "var/backups",
        );
        let services_file = overrides
            .services_file
            .clone()
            .or_else(|| get("BOOTSTRAP_SERVICES_FILE").map(PathBuf::from))
            .map(|p| resolve(&project_dir, p));

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            infra_ready: parse_secs("BOOTSTRAP_INFRA_TIMEOUT_SECS", defaults.infra_ready),
            // 0 会让就绪轮询变成忙等
            ready_poll: parse_secs("BOOTSTRAP_READY_POLL_SECS", defaults.ready_poll)
                .max(Duration::from_secs(1)),
            stabilize: parse_secs("BOOTSTRAP_STABILIZE_SECS", defaults.stabilize),
            health_attempts: get("BOOTSTRAP_HEALTH_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.health_attempts),
            health_backoff: parse_secs("BOOTSTRAP_HEALTH_BACKOFF_SECS", defaults.health_backoff),
            probe_request: defaults.probe_request,
            command: parse_secs("BOOTSTRAP_COMMAND_TIMEOUT_SECS", defaults.command),
        };

        let non_interactive = overrides.non_interactive
            || get("BOOTSTRAP_NON_INTERACTIVE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

        let auto_keys = get("BOOTSTRAP_AUTO_KEYS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_AUTO_KEYS.iter().map(|s| s.to_string()).collect());

        let manifest = ServiceManifest::load(services_file.as_deref())?;

        Ok(Self {
            project_dir,
            env_file,
            compose_file,
            state_dir,
            backup_dir,
            min_disk_gb: parse_f64("BOOTSTRAP_MIN_DISK_GB", 10.0),
            min_memory_gb: parse_f64("BOOTSTRAP_MIN_MEMORY_GB", 4.0),
            timeouts,
            non_interactive,
            skip_build: overrides.skip_build,
            db_service: get("BOOTSTRAP_DB_SERVICE").unwrap_or_else(|| "postgres".to_string()),
            db_superuser: get("BOOTSTRAP_DB_SUPERUSER").unwrap_or_else(|| "postgres".to_string()),
            db_password_key: "POSTGRES_PASSWORD".to_string(),
            auto_keys,
            manifest,
        })
    }

    /// 必需键：固定集合加上清单中每个数据库的密码键
    pub fn required_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = BASE_REQUIRED_KEYS.iter().map(|k| k.to_string()).collect();
        keys.insert(self.db_password_key.clone());
        for svc in self.manifest.services() {
            if let Some(db) = &svc.database {
                keys.insert(db.password_key.clone());
            }
        }
        keys
    }

    /// 期望运行的服务数量
    pub fn expected_services(&self) -> usize {
        self.manifest.len()
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// 常量
pub mod constants {
    /// 外部命令默认超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 短命令（ps、exec 探测）超时（秒）
    pub const SHORT_COMMAND_TIMEOUT_SECS: u64 = 30;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
