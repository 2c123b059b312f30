//! Homelab Bootstrap - 单机 homelab 引导与回滚
//!
//! 库入口：`main.rs` 只负责参数解析、日志初始化与退出码

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use config::{BootstrapConfig, ConfigOverrides};
pub use error::{BootstrapError, BootstrapResult};
pub use services::bootstrap::{Bootstrap, Collaborators, RunOutcome};

use infra::{ComposeRuntime, ConsolePrompt, DatabaseAdmin, HttpProbe, PostgresAdmin, SystemHost};
use services::state_store::{StateRecord, StateStore};

/// 以真实协作者执行一次引导
pub async fn run(config: BootstrapConfig, cancel: CancellationToken) -> BootstrapResult<RunOutcome> {
    let runtime = Arc::new(ComposeRuntime::detect(&config, cancel.clone()).await);
    let probe = HttpProbe::new(config.timeouts.probe_request)
        .map_err(|e| BootstrapError::Config(e.to_string()))?;

    let db_runtime = runtime.clone();
    let db_service = config.db_service.clone();
    let db_superuser = config.db_superuser.clone();
    let connect_db = Box::new(move |password: &str| {
        Arc::new(PostgresAdmin::new(
            db_runtime.clone(),
            &db_service,
            &db_superuser,
            password,
        )) as Arc<dyn DatabaseAdmin>
    });

    let bootstrap = Bootstrap::new(
        config,
        Collaborators {
            runtime,
            connect_db,
            probe: Arc::new(probe),
            host: Arc::new(SystemHost),
            prompt: Arc::new(ConsolePrompt),
        },
    );
    Ok(bootstrap.run(cancel).await)
}

/// 上次完成记录
pub async fn status(config: &BootstrapConfig) -> Option<StateRecord> {
    StateStore::new(config.state_dir.clone()).load().await
}
