//! Process-wide metrics surface shared by every component.
//!
//! A single [`Metrics`] value is built at startup and threaded through the
//! call graph inside the shared context — no global registry.

use std::sync::Arc;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObsError {
    #[error("metrics registration: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Named metrics for the telemetry/command pipeline.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // heartbeat ingest
    pub heartbeats_ingested_total: IntCounter,
    pub hb_writes_total: IntCounter,
    pub hb_dedupe_total: IntCounter,
    pub last_status_upserts_total: IntCounter,
    pub hb_write_latency_ms: Histogram,

    // dispatch
    pub dispatches_total: IntCounterVec,
    pub dispatch_idempotency_hits_total: IntCounter,
    pub fcm_latency_ms: Histogram,

    // registration gate
    pub registration_queue_wait_ms: Histogram,
    pub registration_active: IntGauge,

    // event queue
    pub event_queue_dropped_total: IntCounter,

    // alerts
    pub alert_evaluations_total: IntCounter,
    pub alerts_raised_total: IntCounterVec,
    pub alerts_recovered_total: IntCounterVec,
    pub alert_evaluation_latency_ms: Histogram,

    // partition lifecycle
    pub partitions_created_total: IntCounter,
    pub partitions_archived_total: IntCounter,
    pub partitions_dropped_total: IntCounter,
    pub archive_failures_total: IntCounter,

    // reconciliation
    pub reconcile_repairs_total: IntCounter,

    // http
    pub http_requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, ObsError> {
        let registry = Registry::new();

        let heartbeats_ingested_total =
            IntCounter::new("heartbeats_ingested_total", "Heartbeat submissions accepted")?;
        let hb_writes_total =
            IntCounter::new("hb_writes_total", "Heartbeat history rows inserted")?;
        let hb_dedupe_total =
            IntCounter::new("hb_dedupe_total", "Heartbeats deduplicated by bucket")?;
        let last_status_upserts_total = IntCounter::new(
            "last_status_upserts_total",
            "Last-status projection upserts",
        )?;
        let hb_write_latency_ms = Histogram::with_opts(
            HistogramOpts::new("hb_write_latency_ms", "Heartbeat dual-write latency")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]),
        )?;

        let dispatches_total = IntCounterVec::new(
            Opts::new("dispatches_total", "Command dispatches by action and outcome"),
            &["action", "outcome"],
        )?;
        let dispatch_idempotency_hits_total = IntCounter::new(
            "dispatch_idempotency_hits_total",
            "Dispatch requests answered from the ledger",
        )?;
        let fcm_latency_ms = Histogram::with_opts(
            HistogramOpts::new("fcm_latency_ms", "Push provider round-trip latency")
                .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]),
        )?;

        let registration_queue_wait_ms = Histogram::with_opts(
            HistogramOpts::new("registration_queue_wait_ms", "Registration admission wait")
                .buckets(vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 15000.0]),
        )?;
        let registration_active =
            IntGauge::new("registration_active_count", "Registrations currently admitted")?;

        let event_queue_dropped_total = IntCounter::new(
            "event_queue_dropped_total",
            "Device events shed on queue overflow",
        )?;

        let alert_evaluations_total =
            IntCounter::new("alert_evaluations_total", "Alert evaluator ticks")?;
        let alerts_raised_total = IntCounterVec::new(
            Opts::new("alerts_raised_total", "Alerts raised by condition"),
            &["condition"],
        )?;
        let alerts_recovered_total = IntCounterVec::new(
            Opts::new("alerts_recovered_total", "Alerts recovered by condition"),
            &["condition"],
        )?;
        let alert_evaluation_latency_ms = Histogram::with_opts(
            HistogramOpts::new("alert_evaluation_latency_ms", "Alert tick latency")
                .buckets(vec![5.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
        )?;

        let partitions_created_total =
            IntCounter::new("partitions_created_total", "Heartbeat partitions created")?;
        let partitions_archived_total =
            IntCounter::new("partitions_archived_total", "Heartbeat partitions archived")?;
        let partitions_dropped_total =
            IntCounter::new("partitions_dropped_total", "Heartbeat partitions dropped")?;
        let archive_failures_total =
            IntCounter::new("archive_failures_total", "Partition archive failures")?;

        let reconcile_repairs_total = IntCounter::new(
            "reconcile_repairs_total",
            "Last-status rows repaired by reconciliation",
        )?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status"),
            &["route", "method", "status_code"],
        )?;

        registry.register(Box::new(heartbeats_ingested_total.clone()))?;
        registry.register(Box::new(hb_writes_total.clone()))?;
        registry.register(Box::new(hb_dedupe_total.clone()))?;
        registry.register(Box::new(last_status_upserts_total.clone()))?;
        registry.register(Box::new(hb_write_latency_ms.clone()))?;
        registry.register(Box::new(dispatches_total.clone()))?;
        registry.register(Box::new(dispatch_idempotency_hits_total.clone()))?;
        registry.register(Box::new(fcm_latency_ms.clone()))?;
        registry.register(Box::new(registration_queue_wait_ms.clone()))?;
        registry.register(Box::new(registration_active.clone()))?;
        registry.register(Box::new(event_queue_dropped_total.clone()))?;
        registry.register(Box::new(alert_evaluations_total.clone()))?;
        registry.register(Box::new(alerts_raised_total.clone()))?;
        registry.register(Box::new(alerts_recovered_total.clone()))?;
        registry.register(Box::new(alert_evaluation_latency_ms.clone()))?;
        registry.register(Box::new(partitions_created_total.clone()))?;
        registry.register(Box::new(partitions_archived_total.clone()))?;
        registry.register(Box::new(partitions_dropped_total.clone()))?;
        registry.register(Box::new(archive_failures_total.clone()))?;
        registry.register(Box::new(reconcile_repairs_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            heartbeats_ingested_total,
            hb_writes_total,
            hb_dedupe_total,
            last_status_upserts_total,
            hb_write_latency_ms,
            dispatches_total,
            dispatch_idempotency_hits_total,
            fcm_latency_ms,
            registration_queue_wait_ms,
            registration_active,
            event_queue_dropped_total,
            alert_evaluations_total,
            alerts_raised_total,
            alerts_recovered_total,
            alert_evaluation_latency_ms,
            partitions_created_total,
            partitions_archived_total,
            partitions_dropped_total,
            archive_failures_total,
            reconcile_repairs_total,
            http_requests_total,
        }))
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        // Encoding into a Vec cannot fail in practice; fall back to empty.
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = Metrics::new().unwrap();
        metrics.hb_writes_total.inc();
        metrics.hb_dedupe_total.inc_by(3);
        metrics
            .dispatches_total
            .with_label_values(&["ping", "sent"])
            .inc();

        let text = metrics.render();
        assert!(text.contains("hb_writes_total 1"));
        assert!(text.contains("hb_dedupe_total 3"));
        assert!(text.contains("dispatches_total"));
    }
}
