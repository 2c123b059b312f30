//! 健康验证
//!
//! 对每个有存活端点的服务做有上限的重试探测，并检查每个服务数据库是否已有表。
//! 关键服务探测失败计为 failed，非关键服务计为 warned。

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Timeouts;
use crate::domain::deploy::StageResult;
use crate::domain::service::ServiceDescriptor;
use crate::domain::summary::Summary;
use crate::infra::{DatabaseAdmin, HealthProbe};

/// 验证全部服务，返回汇总
pub async fn validate_health(
    services: &[ServiceDescriptor],
    probe: &dyn HealthProbe,
    db: &dyn DatabaseAdmin,
    timeouts: &Timeouts,
) -> Summary {
    let mut summary = Summary::new();

    for svc in services {
        let Some(url) = &svc.health_url else {
            continue;
        };
        let started = Instant::now();
        let name = format!("health:{}", svc.name);

        let result = match probe_with_retry(svc, url, probe, timeouts.health_attempts, timeouts.health_backoff).await {
            Ok((status, attempt)) => {
                info!(service = %svc.name, status, attempt, "Health check passed");
                StageResult::pass(name, format!("HTTP {} (attempt {})", status, attempt))
            }
            Err(reason) if svc.critical => {
                warn!(service = %svc.name, reason = %reason, "Critical service failed health check");
                StageResult::fail(name, reason)
            }
            Err(reason) => {
                warn!(service = %svc.name, reason = %reason, "Service failed health check");
                StageResult::warn(name, reason)
            }
        };
        summary.record(result.timed(started));
    }

    for svc in services {
        let Some(spec) = &svc.database else {
            continue;
        };
        let name = format!("tables:{}", spec.name);
        let result = match db.count_tables(&spec.name).await {
            Ok(0) => StageResult::warn(name, "database has no tables"),
            Ok(n) => StageResult::pass(name, format!("{} tables", n)),
            Err(e) => StageResult::warn(name, format!("cannot count tables: {}", e)),
        };
        summary.record(result);
    }

    info!(
        passed = summary.passed,
        warned = summary.warned,
        failed = summary.failed,
        "Health validation complete"
    );
    summary
}

/// 探测直到得到可接受状态码或用尽次数；返回 (状态码, 第几次)
async fn probe_with_retry(
    svc: &ServiceDescriptor,
    url: &str,
    probe: &dyn HealthProbe,
    attempts: u32,
    backoff: Duration,
) -> Result<(u16, u32), String> {
    let attempts = attempts.max(1);
    let mut last = String::new();

    for attempt in 1..=attempts {
        match probe.status(url).await {
            Ok(status) if svc.accepts(status) => return Ok((status, attempt)),
            Ok(status) => last = format!("HTTP {} from {}", status, url),
            Err(e) => last = e.to_string(),
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(format!("{} after {} attempts", last, attempts))
}
