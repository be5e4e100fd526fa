//! Observability module for the edgeplane coordinator.
//!
//! Provides logging and Prometheus metrics.

use crate::config::ObservabilityConfig;
use crate::error::{EdgeError, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use ::tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| EdgeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| EdgeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EdgeError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new()
        .route(
            "/metrics",
            axum::routing::get(move || async move { handle.render() }),
        )
        .route("/health", axum::routing::get(|| async { "OK" }));

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| EdgeError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    // Fleet
    gauge!("edgeplane_edges_online").set(0.0);
    gauge!("edgeplane_candidates_online").set(0.0);
    gauge!("edgeplane_groups_total").set(0.0);
    gauge!("edgeplane_validators_total").set(0.0);

    // Replication
    counter!("edgeplane_dispatches_total").absolute(0);
    counter!("edgeplane_dispatch_failures_total").absolute(0);
    counter!("edgeplane_cache_reports_total").absolute(0);
    counter!("edgeplane_jobs_succeeded_total").absolute(0);
    counter!("edgeplane_jobs_failed_total").absolute(0);

    // Election and audits
    counter!("edgeplane_elections_total").absolute(0);
    counter!("edgeplane_spot_checks_total").absolute(0);
}

/// Update online node gauges.
pub fn update_fleet_metrics(edges_online: usize, candidates_online: usize) {
    gauge!("edgeplane_edges_online").set(edges_online as f64);
    gauge!("edgeplane_candidates_online").set(candidates_online as f64);
}

pub fn update_group_metrics(groups: usize) {
    gauge!("edgeplane_groups_total").set(groups as f64);
}

/// Record a cache request sent to a worker.
pub fn record_dispatch(blocks: usize, ok: bool) {
    counter!("edgeplane_dispatches_total").increment(1);
    counter!("edgeplane_dispatched_blocks_total").increment(blocks as u64);
    if !ok {
        counter!("edgeplane_dispatch_failures_total").increment(1);
    }
}

/// Record an ingested completion report.
pub fn record_cache_report(success: bool) {
    counter!(
        "edgeplane_cache_reports_total",
        "success" => success.to_string()
    )
    .increment(1);
}

/// Record a job reaching a terminal state.
pub fn record_job_finished(succeeded: bool) {
    if succeeded {
        counter!("edgeplane_jobs_succeeded_total").increment(1);
    } else {
        counter!("edgeplane_jobs_failed_total").increment(1);
    }
}

/// Record a completed election.
pub fn record_election(validators: usize, unmet_geos: usize) {
    counter!("edgeplane_elections_total").increment(1);
    gauge!("edgeplane_validators_total").set(validators as f64);
    gauge!("edgeplane_election_unmet_geos").set(unmet_geos as f64);
}

/// Record one spot check audit outcome.
pub fn record_spot_check(verdict: &str) {
    counter!(
        "edgeplane_spot_checks_total",
        "verdict" => verdict.to_string()
    )
    .increment(1);
}
