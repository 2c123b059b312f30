//! 领域模型
//!
//! 纯数据结构，不包含业务逻辑

pub mod backup;
pub mod deploy;
pub mod service;
pub mod summary;
pub mod validation;

pub use backup::{BackupArtifact, BackupOutcome};
pub use deploy::{DeploymentState, Phase, PhaseTracker, StageResult, StageStatus};
pub use service::{DatabaseSpec, Readiness, ServiceDescriptor};
pub use summary::{Classification, Summary};
pub use validation::{Severity, ValidationIssue};
