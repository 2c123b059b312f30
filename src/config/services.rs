//! 服务清单
//!
//! 声明受管服务集合。可从 JSON 文件加载，未配置时使用内置的 homelab 清单。

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::domain::service::{Readiness, ServiceDescriptor};
use crate::error::{BootstrapError, BootstrapResult};

/// JSON 清单文件格式
#[derive(Debug, Deserialize)]
struct ManifestFile {
    services: Vec<ServiceDescriptor>,
}

/// 经过校验的服务清单
#[derive(Clone, Debug)]
pub struct ServiceManifest {
    /// 依赖有序（被依赖者在前）
    services: Vec<ServiceDescriptor>,
}

impl ServiceManifest {
    /// 加载清单：指定了文件则读取文件，否则使用内置清单
    pub fn load(path: Option<&Path>) -> BootstrapResult<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    BootstrapError::Config(format!(
                        "cannot read services file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let file: ManifestFile = serde_json::from_str(&content).map_err(|e| {
                    BootstrapError::Config(format!(
                        "cannot parse services file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::new(file.services)
            }
            None => Self::new(default_services()),
        }
    }

    /// 校验并按依赖顺序排列
    pub fn new(services: Vec<ServiceDescriptor>) -> BootstrapResult<Self> {
        if services.is_empty() {
            return Err(BootstrapError::Config("service manifest is empty".into()));
        }

        let by_name: HashMap<&str, &ServiceDescriptor> =
            services.iter().map(|s| (s.name.as_str(), s)).collect();
        if by_name.len() != services.len() {
            return Err(BootstrapError::Config("duplicate service name in manifest".into()));
        }

        for svc in &services {
            for dep in &svc.depends_on {
                let Some(target) = by_name.get(dep.as_str()) else {
                    return Err(BootstrapError::Config(format!(
                        "service '{}' depends on undeclared service '{}'",
                        svc.name, dep
                    )));
                };
                if svc.infrastructure && !target.infrastructure {
                    return Err(BootstrapError::Config(format!(
                        "infrastructure service '{}' cannot depend on application service '{}'",
                        svc.name, dep
                    )));
                }
            }
        }

        let primaries = services.iter().filter(|s| s.primary).count();
        if primaries != 1 {
            return Err(BootstrapError::Config(format!(
                "manifest must mark exactly one primary service, found {}",
                primaries
            )));
        }

        let ordered = topological_order(&services)?;
        Ok(Self { services: ordered })
    }

    /// 全部服务（依赖有序）
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// 基础设施服务
    pub fn infrastructure(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter().filter(|s| s.infrastructure)
    }

    /// 应用服务
    pub fn applications(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter().filter(|s| !s.infrastructure)
    }

    /// 主应用服务
    pub fn primary(&self) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.primary)
    }

    /// 服务名列表（启动顺序）
    pub fn start_order(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

/// Kahn 拓扑排序，同层按声明顺序，检测循环依赖
fn topological_order(services: &[ServiceDescriptor]) -> BootstrapResult<Vec<ServiceDescriptor>> {
    let index: HashMap<&str, usize> = services
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; services.len()];
    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, svc) in services.iter().enumerate() {
        let deps: HashSet<&str> = svc.depends_on.iter().map(|d| d.as_str()).collect();
        in_degree[i] = deps.len();
        for dep in deps {
            dependents.entry(index[dep]).or_default().push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..services.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut ordered = Vec::with_capacity(services.len());
    while let Some(i) = queue.pop_front() {
        ordered.push(services[i].clone());
        if let Some(next) = dependents.get(&i) {
            for &j in next {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
    }

    if ordered.len() != services.len() {
        let stuck: Vec<&str> = services
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.name.as_str())
            .collect();
        return Err(BootstrapError::Config(format!(
            "dependency cycle between services: {}",
            stuck.join(", ")
        )));
    }
    Ok(ordered)
}

/// 内置 homelab 清单
pub fn default_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor::new("postgres").infrastructure(Readiness::Command {
            argv: vec!["pg_isready".into(), "-U".into(), "postgres".into()],
        }),
        ServiceDescriptor::new("redis").infrastructure(Readiness::Command {
            argv: vec!["redis-cli".into(), "ping".into()],
        }),
        ServiceDescriptor::new("minio").infrastructure(Readiness::Http {
            url: "http://localhost:9000/minio/health/live".into(),
        }),
        ServiceDescriptor::new("homelab-dashboard")
            .built()
            .depends_on(&["postgres", "redis", "minio"])
            .with_health("http://localhost:5000/health")
            .with_database("homelab_jarvis", "jarvis", "JARVIS_DB_PASSWORD")
            .primary(&["alembic", "upgrade", "head"]),
        ServiceDescriptor::new("discord-bot")
            .built()
            .depends_on(&["postgres", "redis"])
            .with_health("http://localhost:5001/health")
            .with_database("ticketbot", "ticketbot", "DISCORD_DB_PASSWORD"),
        ServiceDescriptor::new("stream-bot")
            .built()
            .depends_on(&["postgres", "redis"])
            .with_health("http://localhost:3000/health")
            .with_database("streambot", "streambot", "STREAMBOT_DB_PASSWORD"),
    ]
}
