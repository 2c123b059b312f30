//! Homelab Bootstrap
//!
//! Usage:
//! - Full bootstrap: `homelab-bootstrap` (or `homelab-bootstrap up`)
//! - Unattended: `homelab-bootstrap --yes`
//! - Last completed deployment: `homelab-bootstrap status`
//!
//! Log verbosity follows `RUST_LOG` (default `homelab_bootstrap=info`); logs go
//! to stderr, the summary report to stdout.

use clap::Parser;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use homelab_bootstrap::cli::{Cli, Commands};
use homelab_bootstrap::services::report::{render_outcome, render_status};
use homelab_bootstrap::BootstrapConfig;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("homelab_bootstrap=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to create runtime: {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    };
    let code = rt.block_on(run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match BootstrapConfig::from_env(cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return e.exit_code();
        }
    };

    match cli.command() {
        Commands::Status => {
            let record = homelab_bootstrap::status(&config).await;
            print!("{}", render_status(record.as_ref()));
            if record.is_some() {
                0
            } else {
                1
            }
        }
        Commands::Up => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping current stage");
                    on_signal.cancel();
                }
            });

            match homelab_bootstrap::run(config, cancel).await {
                Ok(outcome) => {
                    print!("{}", render_outcome(&outcome));
                    outcome.exit_code
                }
                Err(e) => {
                    eprintln!("{} {}", style("error:").red().bold(), e);
                    e.exit_code()
                }
            }
        }
    }
}
