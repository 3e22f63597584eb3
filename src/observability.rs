use std::net::SocketAddr;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: commit/reschedule attempts. Labels: operation, outcome.
pub const BOOKING_ATTEMPTS_TOTAL: &str = "sessiondesk_booking_attempts_total";

/// Histogram: commit/reschedule latency in seconds. Labels: operation.
pub const BOOKING_DURATION_SECONDS: &str = "sessiondesk_booking_duration_seconds";

// ── Store ───────────────────────────────────────────────────────

/// Counter: events journaled and applied. Labels: kind.
pub const EVENTS_APPLIED_TOTAL: &str = "sessiondesk_events_applied_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "sessiondesk_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "sessiondesk_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
