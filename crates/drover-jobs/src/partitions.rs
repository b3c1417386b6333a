use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, SecondsFormat, Utc};
use drover_obs::Metrics;
use drover_store::{HeartbeatRow, Store};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::error::JobError;
use crate::NIGHTLY_LOCK_ID;

/// Partitions are pre-created for today plus this many future days.
pub const CREATE_AHEAD_DAYS: i64 = 14;
/// Active partitions younger than this get a VACUUM (ANALYZE) pass.
const VACUUM_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct NightlyOptions {
    pub dry_run: bool,
    pub retention_days: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NightlyReport {
    pub skipped: bool,
    pub created: usize,
    pub stats_updated: u64,
    pub archived: usize,
    pub dropped: usize,
    pub vacuumed: u64,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}

/// C2 — nightly partition lifecycle: create-ahead, archive, drop, vacuum.
///
/// The whole run holds the nightly advisory lock; a second holder skips
/// immediately and never waits. Each phase is isolated so one failing
/// partition cannot stall the rest of the run.
pub async fn run_nightly(
    store: Arc<dyn Store>,
    blob: Arc<dyn BlobStore>,
    metrics: Arc<Metrics>,
    opts: NightlyOptions,
) -> Result<NightlyReport, JobError> {
    if !store.try_advisory_lock(NIGHTLY_LOCK_ID).await? {
        info!("nightly maintenance skipped: lock held elsewhere");
        return Ok(NightlyReport { skipped: true, ..Default::default() });
    }

    let result = run_locked(&store, blob.as_ref(), &metrics, &opts).await;

    // Release on every exit path; an unlock failure is logged, not raised,
    // so the run's own outcome survives.
    if let Err(e) = store.advisory_unlock(NIGHTLY_LOCK_ID).await {
        warn!(error = %e, "nightly advisory unlock failed");
    }
    result
}

async fn run_locked(
    store: &Arc<dyn Store>,
    blob: &dyn BlobStore,
    metrics: &Metrics,
    opts: &NightlyOptions,
) -> Result<NightlyReport, JobError> {
    let start = Instant::now();
    let mut report = NightlyReport::default();
    info!(
        dry_run = opts.dry_run,
        retention_days = opts.retention_days,
        "nightly maintenance started"
    );

    // 1. Create-ahead: today and the next CREATE_AHEAD_DAYS days.
    let today = Utc::now().date_naive();
    for offset in 0..=CREATE_AHEAD_DAYS {
        let day = today + Duration::days(offset);
        if opts.dry_run {
            continue;
        }
        match store.ensure_partition(day).await {
            Ok(true) => {
                report.created += 1;
                metrics.partitions_created_total.inc();
            }
            Ok(false) => {}
            Err(e) => {
                warn!(day = %day, error = %e, "partition create failed");
                report.errors.push(format!("create {day}: {e}"));
            }
        }
    }

    // 2. Refresh row counts / sizes for the planner and the archive metadata.
    if !opts.dry_run {
        match store.refresh_partition_stats().await {
            Ok(n) => report.stats_updated = n,
            Err(e) => report.errors.push(format!("stats: {e}")),
        }
    }

    // 3. Archive partitions past the retention cutoff.
    let cutoff = Utc::now() - Duration::days(opts.retention_days);
    let due = store.partitions_due_for_archive(cutoff).await?;
    for partition in due {
        if opts.dry_run {
            info!(partition = %partition.partition_name, "would archive");
            continue;
        }
        match archive_partition(store.as_ref(), blob, &partition).await {
            Ok(row_count) => {
                report.archived += 1;
                metrics.partitions_archived_total.inc();
                info!(
                    partition = %partition.partition_name,
                    row_count,
                    "partition archived"
                );
            }
            Err(e) => {
                // Flip to archive_failed and leave the data in place;
                // the next run retries from the top.
                metrics.archive_failures_total.inc();
                warn!(partition = %partition.partition_name, error = %e, "archive failed");
                report
                    .errors
                    .push(format!("archive {}: {e}", partition.partition_name));
                if let Err(mark) = store
                    .mark_partition_archive_failed(&partition.partition_name)
                    .await
                {
                    warn!(error = %mark, "could not mark archive_failed");
                }
            }
        }
    }

    // 4. Drop archived partitions — only those passing the gate
    //    (archived ∧ archive_url ∧ checksum present).
    for partition in store.droppable_partitions().await? {
        if !partition.droppable() {
            continue;
        }
        if opts.dry_run {
            info!(partition = %partition.partition_name, "would drop");
            continue;
        }
        match store.drop_partition(&partition.partition_name, Utc::now()).await {
            Ok(()) => {
                report.dropped += 1;
                metrics.partitions_dropped_total.inc();
                info!(partition = %partition.partition_name, "partition dropped");
            }
            Err(e) => {
                warn!(partition = %partition.partition_name, error = %e, "drop failed");
                report
                    .errors
                    .push(format!("drop {}: {e}", partition.partition_name));
            }
        }
    }

    // 5. Keep the planner's pruning sharp on the hot window.
    if !opts.dry_run {
        match store.vacuum_recent_partitions(VACUUM_WINDOW_DAYS).await {
            Ok(n) => report.vacuumed = n,
            Err(e) => report.errors.push(format!("vacuum: {e}")),
        }
    }

    report.elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        created = report.created,
        archived = report.archived,
        dropped = report.dropped,
        vacuumed = report.vacuumed,
        errors = report.errors.len(),
        elapsed_ms = report.elapsed_ms,
        "nightly maintenance complete"
    );
    Ok(report)
}

/// Export → checksum → upload → metadata, in that order. The metadata row
/// is only flipped to `archived` after the object is durably stored.
async fn archive_partition(
    store: &dyn Store,
    blob: &dyn BlobStore,
    partition: &drover_store::PartitionRow,
) -> Result<i64, JobError> {
    let rows = store.export_partition_rows(partition).await?;
    let (bytes, row_count) = encode_archive_csv(&rows)?;
    let checksum = hex::encode(Sha256::digest(&bytes));

    let key = format!("heartbeats/{}.csv", partition.partition_name);
    let url = blob.put(&key, &bytes).await?;

    store
        .mark_partition_archived(
            &partition.partition_name,
            row_count,
            &checksum,
            &url,
            Utc::now(),
        )
        .await?;
    Ok(row_count)
}

/// Canonical archive CSV: fixed column order, UTF-8, RFC 3339 timestamps.
/// The SHA-256 recorded next to the archive is over exactly these bytes.
pub fn encode_archive_csv(rows: &[HeartbeatRow]) -> Result<(Vec<u8>, i64), JobError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "device_id",
            "ts",
            "battery_pct",
            "network_type",
            "unity_running",
            "signal_dbm",
            "agent_version",
            "ip",
            "status",
        ])
        .map_err(|e| JobError::Encoding(e.to_string()))?;

    for row in rows {
        writer
            .write_record([
                row.device_id.as_str(),
                &row.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
                &opt_to_field(row.battery_pct),
                row.network_type.as_deref().unwrap_or(""),
                &row.unity_running.map(|b| b.to_string()).unwrap_or_default(),
                &opt_to_field(row.signal_dbm),
                row.agent_version.as_deref().unwrap_or(""),
                row.ip.as_deref().unwrap_or(""),
                &row.status,
            ])
            .map_err(|e| JobError::Encoding(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| JobError::Encoding(e.to_string()))?;
    Ok((bytes, rows.len() as i64))
}

fn opt_to_field<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{FailingBlobStore, MemoryBlobStore};
    use chrono::{NaiveDate, TimeZone};
    use drover_domain::{bucket_start, DeviceId, PartitionLifecycle};
    use drover_store::{partition_name_for, InMemoryStore, LastStatusRow};

    fn hb(device: &str, ts: chrono::DateTime<Utc>, battery: i32) -> HeartbeatRow {
        HeartbeatRow {
            device_id: DeviceId::new(device),
            ts,
            bucket_ts: bucket_start(ts, 10),
            ip: Some("10.0.0.5".into()),
            status: "ok".into(),
            battery_pct: Some(battery),
            plugged: None,
            temp_c: None,
            network_type: Some("wifi".into()),
            signal_dbm: Some(-61),
            uptime_s: None,
            ram_used_mb: None,
            unity_pkg_version: None,
            unity_running: Some(true),
            agent_version: Some("1.4.2".into()),
        }
    }

    fn last(device: &str, ts: chrono::DateTime<Utc>) -> LastStatusRow {
        LastStatusRow {
            device_id: DeviceId::new(device),
            last_ts: ts,
            battery_pct: None,
            network_type: None,
            unity_running: None,
            signal_dbm: None,
            agent_version: None,
            ip: None,
            status: "ok".into(),
            service_up: None,
            monitored_foreground_recent_s: None,
            monitored_package: None,
            monitored_threshold_min: None,
        }
    }

    async fn seeded(day: NaiveDate, rows: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.ensure_partition(day).await.unwrap();
        let base = day.and_hms_opt(8, 0, 0).unwrap().and_utc();
        for i in 0..rows {
            let ts = base + Duration::seconds((i * 30) as i64);
            store
                .record_heartbeat(&hb("d1", ts, 80), &last("d1", ts))
                .await
                .unwrap();
        }
        store
    }

    fn opts() -> NightlyOptions {
        NightlyOptions { dry_run: false, retention_days: 2 }
    }

    #[tokio::test]
    async fn create_ahead_provisions_fifteen_days() {
        let store = Arc::new(InMemoryStore::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let report = run_nightly(store.clone(), blob, Metrics::new().unwrap(), opts())
            .await
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.created, (CREATE_AHEAD_DAYS + 1) as usize);

        // second run is a no-op for creation
        let blob = Arc::new(MemoryBlobStore::new());
        let again = run_nightly(store, blob, Metrics::new().unwrap(), opts())
            .await
            .unwrap();
        assert_eq!(again.created, 0);
    }

    #[tokio::test]
    async fn archive_then_drop_with_checksum_round_trip() {
        let old_day = Utc::now().date_naive() - Duration::days(4);
        let store = seeded(old_day, 120).await;
        let blob = Arc::new(MemoryBlobStore::new());
        let name = partition_name_for(old_day);

        let report = run_nightly(store.clone(), blob.clone(), Metrics::new().unwrap(), opts())
            .await
            .unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.dropped, 1, "archived partition passes the drop gate");

        let meta = store
            .list_partitions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.partition_name == name)
            .unwrap();
        assert_eq!(meta.state, PartitionLifecycle::Dropped);
        assert_eq!(meta.row_count, Some(120));

        // round-trip: re-hash the stored object, must equal the metadata
        let stored = blob.get(&format!("heartbeats/{name}.csv")).await.unwrap();
        let rehash = hex::encode(Sha256::digest(&stored));
        assert_eq!(Some(rehash), meta.checksum_sha256);

        // the CSV itself is canonical: header plus 120 data rows
        let text = String::from_utf8(stored).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "device_id,ts,battery_pct,network_type,unity_running,signal_dbm,agent_version,ip,status"
        );
        assert_eq!(lines.count(), 120);
    }

    #[tokio::test]
    async fn failed_archive_is_never_dropped() {
        let old_day = Utc::now().date_naive() - Duration::days(4);
        let store = seeded(old_day, 10).await;
        let name = partition_name_for(old_day);

        let report = run_nightly(
            store.clone(),
            Arc::new(FailingBlobStore),
            Metrics::new().unwrap(),
            opts(),
        )
        .await
        .unwrap();
        assert_eq!(report.archived, 0);
        assert_eq!(report.dropped, 0);
        assert!(!report.errors.is_empty());

        let meta = store
            .list_partitions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.partition_name == name)
            .unwrap();
        assert_eq!(meta.state, PartitionLifecycle::ArchiveFailed);

        // the failed partition stays out of the droppable set forever
        assert!(store.droppable_partitions().await.unwrap().is_empty());
        // and its rows are still there for the retry
        assert_eq!(store.export_partition_rows(&meta).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn contended_lock_skips_the_run() {
        let store = Arc::new(InMemoryStore::new());
        store.try_advisory_lock(NIGHTLY_LOCK_ID).await.unwrap();

        let report = run_nightly(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            Metrics::new().unwrap(),
            opts(),
        )
        .await
        .unwrap();
        assert!(report.skipped);
        assert_eq!(report.created, 0);

        // the contender must not have released someone else's lock
        store.advisory_unlock(NIGHTLY_LOCK_ID).await.unwrap();
        assert!(store.try_advisory_lock(NIGHTLY_LOCK_ID).await.unwrap());
    }

    #[test]
    fn archive_csv_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 25, 9, 0, 0).unwrap();
        let rows = vec![hb("d1", ts, 80), hb("d2", ts + Duration::seconds(30), 55)];
        let (a, n1) = encode_archive_csv(&rows).unwrap();
        let (b, n2) = encode_archive_csv(&rows).unwrap();
        assert_eq!(a, b);
        assert_eq!(n1, 2);
        assert_eq!(n2, 2);
        assert_eq!(
            hex::encode(Sha256::digest(&a)),
            hex::encode(Sha256::digest(&b))
        );
    }
}
