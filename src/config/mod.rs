//! 配置模块
//!
//! 环境变量解析、`.env` 配置源与服务清单

pub mod env;
pub mod env_file;
pub mod services;

pub use env::{BootstrapConfig, ConfigOverrides, Timeouts};
pub use env_file::EnvFile;
pub use services::ServiceManifest;
