//! Prometheus exporter for the engine's counters

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::ServerError;

/// Counters emitted by the storage engine and the feed loop
const COUNTERS: &[(&str, &str)] = &[
    ("pim_sync_writes_total", "Statements written"),
    ("pim_sync_write_failures_total", "Statements that failed to write"),
    ("pim_sync_batch_fallbacks_total", "Batches rewritten one statement at a time"),
    ("pim_sync_column_repairs_total", "Columns added while writing"),
    ("pim_sync_host_outage_waits_total", "Writes parked until a host came back"),
    ("pim_sync_reconnects_total", "Sessions re-established after closing"),
    ("pim_sync_events_total", "Change events read from the feed"),
    ("pim_sync_event_failures_total", "Change events that could not be applied"),
];

/// Serve `/metrics` on `port`; needs a running tokio runtime
pub fn init_metrics(port: u16) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;

    for (name, help) in COUNTERS {
        metrics::describe_counter!(*name, *help);
    }
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}
