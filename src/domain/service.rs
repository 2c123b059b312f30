//! 受管服务的静态声明

use serde::{Deserialize, Serialize};

/// 就绪探测方式
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readiness {
    /// 在容器内执行命令，退出码 0 即就绪 (e.g., `pg_isready`)
    Command { argv: Vec<String> },
    /// HTTP 端点返回可接受状态码即就绪
    Http { url: String },
    /// 容器处于 running 状态即就绪
    Running,
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness::Running
    }
}

/// 服务拥有的数据库
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseSpec {
    /// 数据库名称
    pub name: String,
    /// 数据库所有者
    pub user: String,
    /// 配置源中保存该用户密码的键
    pub password_key: String,
}

/// 服务描述
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// compose 服务名
    pub name: String,
    /// 存活探测 URL
    #[serde(default)]
    pub health_url: Option<String>,
    /// 视为存活的状态码
    #[serde(default = "default_accept_status")]
    pub accept_status: Vec<u16>,
    /// 启动依赖
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// 是否为基础设施（数据库、缓存、对象存储）
    #[serde(default)]
    pub infrastructure: bool,
    /// 健康检查失败是否计为 failed（否则为 warned）
    #[serde(default)]
    pub critical: bool,
    /// 主应用（拥有主数据库与迁移命令）
    #[serde(default)]
    pub primary: bool,
    /// 是否有本地构建上下文
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub database: Option<DatabaseSpec>,
    /// 以一次性容器运行的迁移命令
    #[serde(default)]
    pub migrate_command: Option<Vec<String>>,
}

fn default_accept_status() -> Vec<u16> {
    vec![200, 302]
}

impl ServiceDescriptor {
    /// 创建最简服务描述
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            health_url: None,
            accept_status: default_accept_status(),
            depends_on: Vec::new(),
            infrastructure: false,
            critical: false,
            primary: false,
            build: false,
            readiness: Readiness::Running,
            database: None,
            migrate_command: None,
        }
    }

    pub fn infrastructure(mut self, readiness: Readiness) -> Self {
        self.infrastructure = true;
        self.readiness = readiness;
        self
    }

    pub fn with_health(mut self, url: &str) -> Self {
        self.health_url = Some(url.to_string());
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn primary(mut self, migrate_command: &[&str]) -> Self {
        self.primary = true;
        self.critical = true;
        self.migrate_command = Some(migrate_command.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn built(mut self) -> Self {
        self.build = true;
        self
    }

    pub fn with_database(mut self, name: &str, user: &str, password_key: &str) -> Self {
        self.database = Some(DatabaseSpec {
            name: name.to_string(),
            user: user.to_string(),
            password_key: password_key.to_string(),
        });
        self
    }

    /// 状态码是否视为存活
    pub fn accepts(&self, status: u16) -> bool {
        self.accept_status.contains(&status)
    }
}
