//! newsrelay binary entrypoint.
//! Resolves config, wires the context, then runs the pipeline once or on an interval.

use std::process::ExitCode;
use std::time::Duration;

use newsrelay::{config, scheduler, telemetry, AppContext, Orchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cfg = match config::resolve() {
        Ok(cfg) => cfg,
        Err(e) => {
            telemetry::init_tracing(None);
            tracing::error!(error = %format!("{e:#}"), "config resolution failed");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init_tracing(cfg.logger.level.as_deref());

    if let Err(e) = telemetry::install_prometheus_from_env() {
        tracing::warn!(error = %format!("{e:#}"), "metrics exporter disabled");
    }

    tracing::info!(
        spiders = cfg.spiders.len(),
        notifiers = cfg.notifiers.len(),
        max_workers = cfg.max_workers(),
        store = %cfg.store.path.display(),
        "config resolved"
    );

    let interval = cfg.schedule.interval_secs.filter(|s| *s > 0);
    let ctx = match AppContext::init(cfg).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "startup failed");
            return ExitCode::FAILURE;
        }
    };
    let orchestrator = match Orchestrator::from_context(&ctx) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "cannot build pipeline");
            return ExitCode::FAILURE;
        }
    };

    match interval {
        Some(secs) => {
            tracing::info!(interval_secs = secs, "scheduler started");
            scheduler::run_every(&orchestrator, Duration::from_secs(secs)).await;
            ExitCode::SUCCESS
        }
        None => {
            if orchestrator.run().await.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
