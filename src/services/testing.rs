//! 测试替身：内存中的容器运行时、数据库、探测器与主机

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

use crate::config::{BootstrapConfig, ConfigOverrides, EnvFile, ServiceManifest, Timeouts};
use crate::domain::service::{Readiness, ServiceDescriptor};
use crate::infra::database::DbError;
use crate::infra::probe::ProbeError;
use crate::infra::{
    Confirm, ContainerRuntime, DatabaseAdmin, ExecOutput, ExecRequest, HealthProbe, HostInspector,
    Provisioned, RuntimeError,
};

use super::env_validator::{validate_environment, ValidatedEnv};

pub const TEST_KEYS: &[(&str, &str)] = &[
    ("POSTGRES_PASSWORD", "pg-secret"),
    ("WEB_USERNAME", "admin"),
    ("WEB_PASSWORD", "web-secret"),
    ("SESSION_SECRET", "session-secret"),
    ("HOMELAB_DB_PASSWORD", "homelab-secret"),
    ("WORKER_DB_PASSWORD", "worker-secret"),
    ("SERVICE_AUTH_TOKEN", "token"),
];

pub const DASHBOARD_HEALTH: &str = "http://dashboard.test/health";
pub const WORKER_HEALTH: &str = "http://worker.test/health";

/// 四个服务的小清单：postgres、redis、dashboard（主应用）、worker
pub fn test_manifest() -> ServiceManifest {
    ServiceManifest::new(vec![
        ServiceDescriptor::new("postgres").infrastructure(Readiness::Command {
            argv: vec!["pg_isready".into()],
        }),
        ServiceDescriptor::new("redis")
            .infrastructure(Readiness::Command {
                argv: vec!["redis-cli".into(), "ping".into()],
            })
            .depends_on(&["postgres"]),
        ServiceDescriptor::new("dashboard")
            .built()
            .depends_on(&["postgres", "redis"])
            .with_health(DASHBOARD_HEALTH)
            .with_database("homelab", "homelab", "HOMELAB_DB_PASSWORD")
            .primary(&["migrate"]),
        ServiceDescriptor::new("worker")
            .depends_on(&["postgres", "redis"])
            .with_health(WORKER_HEALTH)
            .with_database("worker_db", "worker", "WORKER_DB_PASSWORD"),
    ])
    .unwrap()
}

/// 临时项目目录与对应配置
pub struct TestProject {
    pub dir: TempDir,
    pub config: BootstrapConfig,
}

impl TestProject {
    pub fn new() -> Self {
        Self::without(&[])
    }

    /// `.env` 中省略给定的键
    pub fn without(missing: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let env: String = TEST_KEYS
            .iter()
            .filter(|(k, _)| !missing.contains(k))
            .map(|(k, v)| format!("{k}={v}\n"))
            .collect();
        std::fs::write(dir.path().join(".env"), env).unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();

        let overrides = ConfigOverrides {
            project_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut config = BootstrapConfig::from_lookup(|_| None, overrides).unwrap();
        config.manifest = test_manifest();
        config.timeouts = Timeouts {
            infra_ready: Duration::from_millis(200),
            ready_poll: Duration::from_millis(10),
            stabilize: Duration::ZERO,
            health_attempts: 2,
            health_backoff: Duration::ZERO,
            probe_request: Duration::from_secs(1),
            command: Duration::from_secs(5),
        };
        Self { dir, config }
    }

    pub fn env_file(&self) -> EnvFile {
        EnvFile::load(&self.config.env_file).unwrap()
    }

    pub fn validated_env(&self) -> ValidatedEnv {
        let mut env = self.env_file();
        validate_environment(&mut env, &self.config.required_keys(), &self.config.auto_keys).unwrap()
    }
}

#[derive(Debug)]
pub struct RuntimeState {
    pub installed: bool,
    pub daemon_up: bool,
    pub compose: bool,
    pub running: BTreeSet<String>,
    pub build_calls: Vec<Vec<String>>,
    pub start_calls: Vec<Vec<String>>,
    pub stop_calls: Vec<Vec<String>>,
    pub oneoffs: Vec<(String, Vec<String>)>,
    pub fail_build: bool,
    /// 启动该服务时失败
    pub fail_start: Option<String>,
    /// 就绪探测永远失败的服务
    pub never_ready: BTreeSet<String>,
    pub migrate_exit: i32,
    pub stop_fails: bool,
    /// 第一次构建或启动时统计该目录中的文件数
    pub watch_backups: Option<PathBuf>,
    pub backups_before_mutation: Option<usize>,
    /// 每次 exec 探测的耗时
    pub exec_delay: Duration,
    /// 固定的 exec 输出（模拟容器内 psql）
    pub exec_reply: Option<ExecOutput>,
}

impl RuntimeState {
    fn note_mutation(&mut self) {
        if self.backups_before_mutation.is_none() {
            if let Some(dir) = &self.watch_backups {
                let count = std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0);
                self.backups_before_mutation = Some(count);
            }
        }
    }
}

/// 内存容器运行时，`start` 后服务即处于 running
#[derive(Clone)]
pub struct FakeRuntime {
    inner: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::with_running(&[])
    }

    pub fn with_running(services: &[&str]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RuntimeState {
                installed: true,
                daemon_up: true,
                compose: true,
                running: services.iter().map(|s| s.to_string()).collect(),
                build_calls: Vec::new(),
                start_calls: Vec::new(),
                stop_calls: Vec::new(),
                oneoffs: Vec::new(),
                fail_build: false,
                fail_start: None,
                never_ready: BTreeSet::new(),
                migrate_exit: 0,
                stop_fails: false,
                watch_backups: None,
                backups_before_mutation: None,
                exec_delay: Duration::ZERO,
                exec_reply: None,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.lock().unwrap()
    }

    /// 所有启动调用涉及的服务
    pub fn started(&self) -> Vec<String> {
        self.state().start_calls.iter().flatten().cloned().collect()
    }
}

fn exit(command: &str, code: i32) -> RuntimeError {
    RuntimeError::Exit {
        command: command.to_string(),
        code: Some(code),
        stderr: format!("{command} failed"),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn runtime_installed(&self) -> bool {
        self.state().installed
    }

    async fn daemon_reachable(&self) -> bool {
        self.state().daemon_up
    }

    async fn compose_available(&self) -> bool {
        self.state().compose
    }

    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError> {
        Ok(self.state().running.clone())
    }

    async fn build(&self, services: &[String]) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.note_mutation();
        state.build_calls.push(services.to_vec());
        if state.fail_build {
            return Err(exit("build", 1));
        }
        Ok(())
    }

    async fn start(&self, services: &[String]) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.note_mutation();
        state.start_calls.push(services.to_vec());
        for svc in services {
            if state.fail_start.as_deref() == Some(svc.as_str()) {
                return Err(exit("up", 1));
            }
            state.running.insert(svc.clone());
        }
        Ok(())
    }

    async fn stop(&self, services: &[String]) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.stop_calls.push(services.to_vec());
        if state.stop_fails {
            return Err(exit("stop", 1));
        }
        for svc in services {
            state.running.remove(svc);
        }
        Ok(())
    }

    async fn exec(&self, service: &str, _request: ExecRequest) -> Result<ExecOutput, RuntimeError> {
        let (ready, delay, reply) = {
            let state = self.state();
            (
                state.running.contains(service) && !state.never_ready.contains(service),
                state.exec_delay,
                state.exec_reply.clone(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = reply {
            return Ok(reply);
        }
        Ok(ExecOutput {
            code: Some(if ready { 0 } else { 1 }),
            ..Default::default()
        })
    }

    async fn exec_to_file(
        &self,
        _service: &str,
        _request: ExecRequest,
        _out: std::fs::File,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn run_oneoff(&self, service: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut state = self.state();
        state.oneoffs.push((service.to_string(), argv.to_vec()));
        Ok(ExecOutput {
            code: Some(state.migrate_exit),
            stdout: String::new(),
            stderr: if state.migrate_exit == 0 {
                String::new()
            } else {
                "alembic.util.exc.CommandError: Can't locate revision".to_string()
            },
        })
    }

    fn compose_display(&self) -> String {
        "docker compose -f docker-compose.yml".to_string()
    }
}

#[derive(Debug, Default)]
pub struct DatabaseState {
    /// user -> password
    pub roles: BTreeMap<String, String>,
    /// database -> owner
    pub databases: BTreeMap<String, String>,
    pub tables: BTreeMap<String, u64>,
    pub dump: Vec<u8>,
    pub dump_fails: bool,
    /// 写入部分数据后挂起
    pub dump_stall: Option<Duration>,
    pub fail_provision: bool,
}

/// 内存数据库管理
#[derive(Clone)]
pub struct FakeDatabase {
    inner: Arc<Mutex<DatabaseState>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DatabaseState {
                dump: b"-- PostgreSQL database cluster dump\nCREATE ROLE homelab;\n".to_vec(),
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DatabaseState> {
        self.inner.lock().unwrap()
    }
}

#[async_trait]
impl DatabaseAdmin for FakeDatabase {
    async fn ensure_role(&self, user: &str, password: &str) -> Result<Provisioned, DbError> {
        let mut state = self.state();
        if state.fail_provision {
            return Err(DbError::Query("connection refused".into()));
        }
        match state.roles.insert(user.to_string(), password.to_string()) {
            Some(_) => Ok(Provisioned::AlreadyExists),
            None => Ok(Provisioned::Created),
        }
    }

    async fn ensure_database(&self, name: &str, owner: &str) -> Result<Provisioned, DbError> {
        let mut state = self.state();
        if state.databases.contains_key(name) {
            return Ok(Provisioned::AlreadyExists);
        }
        state.databases.insert(name.to_string(), owner.to_string());
        Ok(Provisioned::Created)
    }

    async fn count_tables(&self, database: &str) -> Result<u64, DbError> {
        Ok(self.state().tables.get(database).copied().unwrap_or(0))
    }

    async fn dump_all(&self, mut out: std::fs::File) -> Result<(), DbError> {
        let (dump, fails, stall) = {
            let state = self.state();
            (state.dump.clone(), state.dump_fails, state.dump_stall)
        };
        if fails {
            return Err(DbError::Query("pg_dumpall: connection refused".into()));
        }
        out.write_all(&dump)
            .map_err(|e| DbError::Query(e.to_string()))?;
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(())
    }

    fn restore_command(&self, artifact: &Path) -> String {
        format!("psql -f {}", artifact.display())
    }
}

/// URL -> 状态码；未登记的 URL 请求失败
#[derive(Clone, Default)]
pub struct FakeProbe {
    inner: Arc<Mutex<(BTreeMap<String, u16>, BTreeMap<String, u32>)>>,
}

impl FakeProbe {
    /// 清单中全部健康端点返回 200
    pub fn healthy(project: &TestProject) -> Self {
        let probe = Self::default();
        for svc in project.config.manifest.services() {
            if let Some(url) = &svc.health_url {
                probe.set(url, 200);
            }
        }
        probe
    }

    pub fn set(&self, url: &str, status: u16) {
        self.inner.lock().unwrap().0.insert(url.to_string(), status);
    }

    pub fn unreachable(&self, url: &str) {
        self.inner.lock().unwrap().0.remove(url);
    }

    pub fn attempts(&self, url: &str) -> u32 {
        self.inner.lock().unwrap().1.get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn status(&self, url: &str) -> Result<u16, ProbeError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.1.entry(url.to_string()).or_default() += 1;
        inner.0.get(url).copied().ok_or_else(|| ProbeError::Request {
            url: url.to_string(),
            reason: "connection refused".into(),
        })
    }
}

pub struct FakeHost {
    pub disk_gb: f64,
    pub memory_gb: f64,
}

impl FakeHost {
    pub fn roomy() -> Self {
        Self {
            disk_gb: 100.0,
            memory_gb: 16.0,
        }
    }
}

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

impl HostInspector for FakeHost {
    fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
        Some((self.disk_gb * GB) as u64)
    }

    fn available_memory_bytes(&self) -> u64 {
        (self.memory_gb * GB) as u64
    }
}

pub struct FakePrompt {
    interactive: bool,
    answer: bool,
}

impl FakePrompt {
    /// 没有终端
    pub fn never() -> Self {
        Self {
            interactive: false,
            answer: false,
        }
    }

    pub fn always() -> Self {
        Self {
            interactive: true,
            answer: true,
        }
    }

    pub fn declines() -> Self {
        Self {
            interactive: true,
            answer: false,
        }
    }
}

impl Confirm for FakePrompt {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn confirm(&self, _question: &str) -> bool {
        self.answer
    }
}
