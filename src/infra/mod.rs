//! 基础设施模块
//!
//! 封装外部依赖（容器运行时、数据库、HTTP 探测、主机资源、命令执行等）

pub mod command;
pub mod database;
pub mod host;
pub mod probe;
pub mod prompt;
pub mod runtime;

pub use command::CommandRunner;
pub use database::{DatabaseAdmin, PostgresAdmin, Provisioned};
pub use host::{HostInspector, SystemHost};
pub use probe::{HealthProbe, HttpProbe};
pub use prompt::{Confirm, ConsolePrompt};
pub use runtime::{ComposeRuntime, ContainerRuntime, ExecOutput, ExecRequest, RuntimeError};
