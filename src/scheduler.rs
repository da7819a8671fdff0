// src/scheduler.rs
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::Orchestrator;

/// Run the pipeline every `interval` until Ctrl-C. The first run starts
/// immediately; a slow run delays the next tick instead of bursting.
pub async fn run_every(orchestrator: &Orchestrator, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, scheduler stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = orchestrator.run().await;
                if !report.success {
                    tracing::warn!(
                        state = %report.state,
                        failed_sinks = ?report.failed_sinks,
                        "scheduled run unsuccessful"
                    );
                }
            }
        }
    }
}
