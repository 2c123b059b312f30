//! 终端汇总输出

use console::style;
use std::fmt::Write;

use crate::domain::deploy::StageStatus;
use crate::domain::summary::Classification;

use super::bootstrap::RunOutcome;
use super::state_store::StateRecord;

/// 渲染运行结果
pub fn render_outcome(outcome: &RunOutcome) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    let _ = writeln!(out, "{}", rule);
    let headline = match outcome.classification {
        Classification::Success => style("BOOTSTRAP COMPLETE").green().bold(),
        Classification::SuccessWithWarnings => style("BOOTSTRAP COMPLETE WITH WARNINGS").yellow().bold(),
        Classification::Failure => style("BOOTSTRAP FAILED").red().bold(),
    };
    let _ = writeln!(out, "{}", headline);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Services running: {}/{}",
        outcome.running_services, outcome.expected_services
    );
    let _ = writeln!(
        out,
        "Checks: {} passed, {} warnings, {} failed",
        outcome.summary.passed, outcome.summary.warned, outcome.summary.failed
    );
    let _ = writeln!(out);

    for result in &outcome.summary.results {
        let icon = match result.status {
            StageStatus::Pass => style(result.status.icon()).green(),
            StageStatus::Warn => style(result.status.icon()).yellow(),
            StageStatus::Fail => style(result.status.icon()).red(),
        };
        let _ = writeln!(
            out,
            "  {} {:<28} {} ({}ms)",
            icon,
            result.name,
            result.detail,
            result.duration_ms()
        );
    }

    if let Some(error) = &outcome.error {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} {}", style("Error:").red().bold(), error);
        if let Some(hint) = &outcome.hint {
            let _ = writeln!(out, "  Try: {}", hint);
        }
    }

    if let Some(report) = &outcome.rollback {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", style("Rollback").bold());
        let _ = writeln!(out, "  Failed stage: {}", report.failed_phase);
        let _ = writeln!(out, "  Exit code: {}", report.exit_code);
        if report.stopped.is_empty() && report.stop_errors.is_empty() {
            let _ = writeln!(out, "  No services were started by this run");
        }
        for name in &report.stopped {
            let _ = writeln!(out, "  stopped {}", name);
        }
        for (name, e) in &report.stop_errors {
            let _ = writeln!(out, "  {} could not stop {}: {}", style("!").red(), name, e);
        }
        match (&report.backup, &report.restore_command) {
            (Some(path), Some(restore)) => {
                let _ = writeln!(out, "  Backup: {}", path.display());
                let _ = writeln!(out, "  Restore: {}", restore);
            }
            _ => {
                let _ = writeln!(out, "  No backup was taken (no prior database state)");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Next steps:");
        for (i, step) in report.remediation.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, step);
        }
    }

    out
}

/// 渲染上次完成记录（`status` 子命令）
pub fn render_status(record: Option<&StateRecord>) -> String {
    match record {
        None => format!(
            "{} no completed deployment recorded (last run failed or never completed)\n",
            style("status:").bold()
        ),
        Some(record) => {
            let mut out = String::new();
            let _ = writeln!(out, "{} {}", style("status:").bold(), record.state.as_str());
            let _ = writeln!(out, "completed:      {}", record.completed_at.to_rfc3339());
            let _ = writeln!(out, "classification: {}", record.classification);
            let _ = writeln!(
                out,
                "services:       {}/{} running",
                record.running_services, record.expected_services
            );
            let _ = writeln!(out, "host:           {}", record.hostname);
            let _ = writeln!(out, "version:        {}", record.tool_version);
            if let Some(backup) = &record.backup {
                let _ = writeln!(out, "backup:         {}", backup.display());
            }
            out
        }
    }
}
