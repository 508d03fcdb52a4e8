//! Prometheus metrics for retention runs.
//!
//! Provides counters for:
//! - Candidates matched and entries deleted per table
//! - Per-entry delete failures and unit-fatal query failures per table
//! - Run outcomes by status
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature, so callers never need their own feature gates.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen_addr: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen_addr = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
             Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record entries matched by a table's candidate query.
pub fn record_retention_candidates(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_candidates_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record retention deletions.
///
/// # Arguments
/// * `table` - The table from which entries were deleted (e.g., "dag_run", "log")
/// * `count` - The number of entries deleted
pub fn record_retention_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record entries whose individual delete failed.
pub fn record_retention_delete_errors(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_delete_errors_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record a cleanup unit that failed as a whole (candidate query error) or
/// was never attempted.
pub fn record_retention_unit_failure(table: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_unit_failures_total",
            "table" => table.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = table;
    }
}

/// Record a finished run by status ("succeeded", "degraded", "failed", "aborted").
pub fn record_retention_run(status: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_runs_total",
            "status" => status.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = status;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
