use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: scheduler operations. Labels: operation, status.
pub const OPERATIONS_TOTAL: &str = "schedula_operations_total";

/// Histogram: operation latency in seconds. Labels: operation.
pub const OPERATION_DURATION_SECONDS: &str = "schedula_operation_duration_seconds";

/// Counter: bookings rejected because they overlap an existing one.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "schedula_scheduling_conflicts_total";

/// Histogram: slots returned per availability query.
pub const SLOTS_RETURNED: &str = "schedula_slots_returned";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: tenants with an open WAL.
pub const TENANTS_ACTIVE: &str = "schedula_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "schedula_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "schedula_wal_flush_batch_size";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
