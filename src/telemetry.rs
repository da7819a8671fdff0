// src/telemetry.rs
//! Tracing subscriber setup and metric descriptions.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_METRICS_ADDR: &str = "METRICS_ADDR";

/// Install the global subscriber. `RUST_LOG` wins over `level`, which wins
/// over `info`. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Register descriptions for every metric the pipeline emits. Safe to call
/// repeatedly.
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("relay_runs_total", "Pipeline runs started.");
        describe_counter!("relay_items_fetched_total", "Items returned by sources.");
        describe_counter!("relay_items_new_total", "Items that passed dedup.");
        describe_counter!(
            "relay_items_duplicate_total",
            "Items dropped as already seen (store or same batch)."
        );
        describe_counter!("relay_items_malformed_total", "Items dropped for an empty title.");
        describe_counter!("relay_source_errors_total", "Source fetches that failed or panicked.");
        describe_counter!(
            "relay_sink_failures_total",
            "Sink dispatches that returned false, errored or panicked."
        );
        describe_gauge!("relay_last_run_ts", "Unix timestamp of the last finished run.");
    });
}

/// Start the Prometheus scrape listener when `METRICS_ADDR` is set.
/// Returns the bound address, if any.
pub fn install_prometheus_from_env() -> Result<Option<SocketAddr>> {
    let Ok(raw) = std::env::var(ENV_METRICS_ADDR) else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid {ENV_METRICS_ADDR} {raw:?}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    describe_metrics();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(Some(addr))
}
