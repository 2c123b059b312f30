//! 命令行参数
//!
//! 只负责解析，执行逻辑在 `main.rs` 与 `services::bootstrap`。

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// Homelab bootstrap
#[derive(Parser, Debug)]
#[command(name = "homelab-bootstrap")]
#[command(about = "Bring a single-host homelab stack to a known-good running state", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Project root (compose file, .env and var/ live here)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Configuration source (default: <project>/.env)
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub compose_file: Option<PathBuf>,

    /// JSON service manifest (default: built-in homelab services)
    #[arg(long, global = true)]
    pub services_file: Option<PathBuf>,

    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub backup_dir: Option<PathBuf>,

    /// Never prompt; soft preflight warnings do not stop the run
    #[arg(long, short = 'y', alias = "yes", global = true)]
    pub non_interactive: bool,

    /// Use existing images instead of building
    #[arg(long)]
    pub skip_build: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the full bootstrap pipeline (default)
    Up,
    /// Show the last completed deployment
    Status,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            project_dir: self.project_dir.clone(),
            env_file: self.env_file.clone(),
            compose_file: self.compose_file.clone(),
            services_file: self.services_file.clone(),
            state_dir: self.state_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            non_interactive: self.non_interactive,
            skip_build: self.skip_build,
        }
    }

    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Up)
    }
}
