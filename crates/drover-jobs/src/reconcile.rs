use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use drover_obs::Metrics;
use drover_store::{LastStatusRow, Store};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::JobError;
use crate::RECONCILE_LOCK_ID;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub dry_run: bool,
    pub max_rows: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { dry_run: false, max_rows: 5000 }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub skipped: bool,
    pub scanned: usize,
    pub repaired: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

/// C8 — repair last-status drift against the authoritative heartbeat history.
///
/// Safe to run concurrently with ingest: the projection upsert is
/// last-writer-wins on `last_ts`, so a fresher heartbeat always prevails.
/// The service-monitoring fields are reset to unknown — they are derived
/// from payload data the history row does not carry, and the next heartbeat
/// recomputes them.
pub async fn run_reconcile(
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    opts: ReconcileOptions,
) -> Result<ReconcileReport, JobError> {
    if !store.try_advisory_lock(RECONCILE_LOCK_ID).await? {
        info!("reconciliation skipped: lock held elsewhere");
        return Ok(ReconcileReport { skipped: true, ..Default::default() });
    }

    let result = run_locked(&store, &metrics, &opts).await;

    if let Err(e) = store.advisory_unlock(RECONCILE_LOCK_ID).await {
        warn!(error = %e, "reconcile advisory unlock failed");
    }
    result
}

async fn run_locked(
    store: &Arc<dyn Store>,
    metrics: &Metrics,
    opts: &ReconcileOptions,
) -> Result<ReconcileReport, JobError> {
    let start = Instant::now();
    let mut report = ReconcileReport::default();

    let stale = store.stale_last_status(opts.max_rows).await?;
    report.scanned = stale.len();
    info!(stale = stale.len(), dry_run = opts.dry_run, "reconciliation started");

    for projection in stale {
        if opts.dry_run {
            continue;
        }

        let hb = &projection.latest;
        let row = LastStatusRow {
            device_id: hb.device_id.clone(),
            last_ts: hb.ts,
            battery_pct: hb.battery_pct,
            network_type: hb.network_type.clone(),
            unity_running: hb.unity_running,
            signal_dbm: hb.signal_dbm,
            agent_version: hb.agent_version.clone(),
            ip: hb.ip.clone(),
            status: hb.status.clone(),
            service_up: None,
            monitored_foreground_recent_s: None,
            monitored_package: None,
            monitored_threshold_min: None,
        };

        match store.upsert_last_status(&row).await {
            Ok(()) => {
                report.repaired += 1;
                metrics.reconcile_repairs_total.inc();
                if let Err(e) = store
                    .append_device_event(
                        &hb.device_id,
                        "reconcile_repair",
                        json!({
                            "old_last_ts": projection.stale_ts,
                            "new_last_ts": hb.ts,
                        }),
                    )
                    .await
                {
                    warn!(device_id = %hb.device_id, error = %e, "repair event append failed");
                }
            }
            Err(e) => {
                warn!(device_id = %hb.device_id, error = %e, "projection repair failed");
                report.errors.push(format!("{}: {e}", hb.device_id));
            }
        }
    }

    report.elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        scanned = report.scanned,
        repaired = report.repaired,
        errors = report.errors.len(),
        elapsed_ms = report.elapsed_ms,
        "reconciliation complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use drover_domain::{bucket_start, DeviceId};
    use drover_store::{HeartbeatRow, InMemoryStore};

    fn hb(device: &str, ts: chrono::DateTime<Utc>) -> HeartbeatRow {
        HeartbeatRow {
            device_id: DeviceId::new(device),
            ts,
            bucket_ts: bucket_start(ts, 10),
            ip: None,
            status: "ok".into(),
            battery_pct: Some(64),
            plugged: None,
            temp_c: None,
            network_type: Some("cellular".into()),
            signal_dbm: Some(-90),
            uptime_s: None,
            ram_used_mb: None,
            unity_pkg_version: None,
            unity_running: Some(true),
            agent_version: Some("1.4.0".into()),
        }
    }

    fn last(device: &str, ts: chrono::DateTime<Utc>) -> LastStatusRow {
        LastStatusRow {
            device_id: DeviceId::new(device),
            last_ts: ts,
            battery_pct: Some(64),
            network_type: Some("cellular".into()),
            unity_running: Some(true),
            signal_dbm: Some(-90),
            agent_version: Some("1.4.0".into()),
            ip: None,
            status: "ok".into(),
            service_up: None,
            monitored_foreground_recent_s: None,
            monitored_package: None,
            monitored_threshold_min: None,
        }
    }

    #[tokio::test]
    async fn repairs_missing_projection_rows() {
        let store = Arc::new(InMemoryStore::new());
        let ts = Utc::now() - Duration::minutes(5);
        store.record_heartbeat(&hb("d1", ts), &last("d1", ts)).await.unwrap();
        store.delete_last_status(&DeviceId::new("d1")).await;

        let report = run_reconcile(
            store.clone(),
            Metrics::new().unwrap(),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.repaired, 1);

        let ls = store
            .get_last_status(&DeviceId::new("d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ls.last_ts, ts);
        assert_eq!(ls.battery_pct, Some(64));

        let events = store
            .list_device_events(Some(&DeviceId::new("d1")), 10)
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.event_type == "reconcile_repair"));
    }

    #[tokio::test]
    async fn in_sync_projection_is_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let ts = Utc::now();
        store.record_heartbeat(&hb("d1", ts), &last("d1", ts)).await.unwrap();

        let report = run_reconcile(
            store,
            Metrics::new().unwrap(),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn dry_run_counts_without_writing() {
        let store = Arc::new(InMemoryStore::new());
        let ts = Utc::now();
        store.record_heartbeat(&hb("d1", ts), &last("d1", ts)).await.unwrap();
        store.delete_last_status(&DeviceId::new("d1")).await;

        let report = run_reconcile(
            store.clone(),
            Metrics::new().unwrap(),
            ReconcileOptions { dry_run: true, max_rows: 100 },
        )
        .await
        .unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.repaired, 0);
        assert!(store
            .get_last_status(&DeviceId::new("d1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn held_lock_skips() {
        let store = Arc::new(InMemoryStore::new());
        store.try_advisory_lock(RECONCILE_LOCK_ID).await.unwrap();
        let report = run_reconcile(
            store,
            Metrics::new().unwrap(),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();
        assert!(report.skipped);
    }
}
