//! 服务层模块
//!
//! 引导流水线的各个组件与编排器

pub mod backup;
pub mod bootstrap;
pub mod env_validator;
pub mod health;
pub mod preflight;
pub mod report;
pub mod rollback;
pub mod stages;
pub mod state_store;

#[cfg(test)]
pub(crate) mod testing;
