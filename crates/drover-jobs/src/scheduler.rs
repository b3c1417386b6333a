use std::sync::Arc;
use std::time::Duration;

use drover_obs::Metrics;
use drover_store::Store;
use tracing::{error, info};

use crate::alerts::AlertEvaluator;
use crate::blob::BlobStore;
use crate::partitions::{run_nightly, NightlyOptions};
use crate::reconcile::{run_reconcile, ReconcileOptions};

const ALERT_TICK: Duration = Duration::from_secs(60);
const RECONCILE_TICK: Duration = Duration::from_secs(60 * 60);
const NIGHTLY_TICK: Duration = Duration::from_secs(24 * 60 * 60);

/// One evaluator task per process; ticks never overlap.
pub fn spawn_alert_loop(evaluator: Arc<AlertEvaluator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ALERT_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = evaluator.tick().await {
                // background failures are logged and survived, never fatal
                error!(error = %e, "alert tick failed");
            }
        }
    })
}

/// Hourly projection repair; contention resolves via the advisory lock.
pub fn spawn_reconcile_loop(
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    max_rows: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RECONCILE_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let opts = ReconcileOptions { dry_run: false, max_rows };
            match run_reconcile(store.clone(), metrics.clone(), opts).await {
                Ok(report) if report.skipped => {}
                Ok(report) => info!(repaired = report.repaired, "scheduled reconciliation done"),
                Err(e) => error!(error = %e, "scheduled reconciliation failed"),
            }
        }
    })
}

/// Daily partition lifecycle. The first tick fires immediately, which also
/// covers the create-ahead requirement at startup.
pub fn spawn_nightly_loop(
    store: Arc<dyn Store>,
    blob: Arc<dyn BlobStore>,
    metrics: Arc<Metrics>,
    retention_days: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(NIGHTLY_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let opts = NightlyOptions { dry_run: false, retention_days };
            match run_nightly(store.clone(), blob.clone(), metrics.clone(), opts).await {
                Ok(report) if report.skipped => {}
                Ok(report) => info!(
                    created = report.created,
                    archived = report.archived,
                    dropped = report.dropped,
                    "scheduled nightly maintenance done"
                ),
                Err(e) => error!(error = %e, "scheduled nightly maintenance failed"),
            }
        }
    })
}
