use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use drover_domain::{DeviceId, ExecId, MonitoringDefaults};

use crate::error::StoreError;
use crate::state::{
    AckOutcome, AlertStateRow, BloatwareRow, DeviceEventRow, DeviceRow, DispatchRow,
    DispatchUpdate, EnrollmentTokenRow, ExecBatchRow, HeartbeatRow, HeartbeatWrite,
    LastStatusRow, NewDispatch, PartitionRow, StaleProjection, TokenConsumption,
};

/// Durable persistence for the telemetry/command pipeline.
///
/// Every method is one transactional operation: either all of its writes
/// commit or none are externally observable. Implementations: Postgres for
/// production, an in-memory twin for tests and local development.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Devices ───────────────────────────────────────────────────────────────

    /// Insert a new device. Alias collisions surface as
    /// [`StoreError::DuplicateAlias`].
    async fn create_device(&self, row: &DeviceRow) -> Result<(), StoreError>;

    async fn get_device(&self, id: &DeviceId) -> Result<Option<DeviceRow>, StoreError>;
    async fn get_device_by_token_id(&self, token_id: &str)
        -> Result<Option<DeviceRow>, StoreError>;
    async fn list_devices(&self) -> Result<Vec<DeviceRow>, StoreError>;

    /// Legacy rows predating the fingerprint column; scanned on auth miss.
    async fn list_devices_missing_token_id(&self) -> Result<Vec<DeviceRow>, StoreError>;
    async fn set_device_token_id(&self, id: &DeviceId, token_id: &str) -> Result<(), StoreError>;

    /// Refresh `last_seen` and the rotatable agent-reported fields.
    async fn touch_device(
        &self,
        id: &DeviceId,
        seen_at: DateTime<Utc>,
        fcm_token: Option<&str>,
        agent_version: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn update_device_monitoring(
        &self,
        id: &DeviceId,
        monitoring: &drover_domain::MonitoringOverrides,
        auto_relaunch_enabled: Option<bool>,
    ) -> Result<(), StoreError>;

    // ── Heartbeats (dual-write) ───────────────────────────────────────────────

    /// Bucket-deduped history insert plus guarded last-status upsert, in one
    /// transaction. The upsert never regresses a strictly newer `last_ts`.
    async fn record_heartbeat(
        &self,
        hb: &HeartbeatRow,
        last: &LastStatusRow,
    ) -> Result<HeartbeatWrite, StoreError>;

    async fn get_last_status(&self, id: &DeviceId) -> Result<Option<LastStatusRow>, StoreError>;
    async fn list_last_status(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<Vec<LastStatusRow>, StoreError>;

    /// Latest `per_device` heartbeats per device, bounded to `window` back
    /// from now. Backed by a window function with partition pruning.
    async fn latest_heartbeats(
        &self,
        device_ids: &[DeviceId],
        per_device: usize,
        window: Duration,
    ) -> Result<Vec<HeartbeatRow>, StoreError>;

    // ── Dispatch ledger ───────────────────────────────────────────────────────

    /// Idempotent by `request_id`: on replay the existing row is returned
    /// with `created = false` and nothing is written.
    async fn insert_dispatch(
        &self,
        new: NewDispatch,
    ) -> Result<(DispatchRow, bool), StoreError>;

    async fn get_dispatch(&self, request_id: &str) -> Result<Option<DispatchRow>, StoreError>;
    async fn update_dispatch_outcome(
        &self,
        request_id: &str,
        update: DispatchUpdate,
    ) -> Result<(), StoreError>;

    /// Write-once completion: a second ACK for the same `request_id` is a
    /// no-op reported as [`AckOutcome::AlreadyCompleted`].
    async fn complete_dispatch(
        &self,
        request_id: &str,
        completed_at: DateTime<Utc>,
        result: &str,
        result_message: Option<&str>,
        succeeded: bool,
    ) -> Result<AckOutcome, StoreError>;

    async fn list_dispatches_for_exec(
        &self,
        exec_id: &ExecId,
    ) -> Result<Vec<DispatchRow>, StoreError>;

    // ── Exec batches ──────────────────────────────────────────────────────────

    async fn insert_exec_batch(&self, row: &ExecBatchRow) -> Result<(), StoreError>;
    async fn get_exec_batch(&self, exec_id: &ExecId) -> Result<Option<ExecBatchRow>, StoreError>;
    async fn list_exec_batches(&self, limit: u32) -> Result<Vec<ExecBatchRow>, StoreError>;
    async fn finish_exec_batch(
        &self,
        exec_id: &ExecId,
        status: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Atomic `SET sent/acked/error = x + n` increments; never read-modify-write.
    async fn bump_exec_counters(
        &self,
        exec_id: &ExecId,
        sent: i64,
        acked: i64,
        errors: i64,
    ) -> Result<(), StoreError>;

    // ── Alert state ───────────────────────────────────────────────────────────

    async fn list_alert_states(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<Vec<AlertStateRow>, StoreError>;
    async fn upsert_alert_state(&self, row: &AlertStateRow) -> Result<(), StoreError>;

    // ── Enrollment tokens ─────────────────────────────────────────────────────

    async fn insert_enrollment_token(&self, row: &EnrollmentTokenRow) -> Result<(), StoreError>;
    async fn get_enrollment_token(
        &self,
        token_id: &str,
    ) -> Result<Option<EnrollmentTokenRow>, StoreError>;
    async fn list_enrollment_tokens(&self) -> Result<Vec<EnrollmentTokenRow>, StoreError>;
    async fn revoke_enrollment_token(&self, token_id: &str) -> Result<(), StoreError>;

    /// Atomic consume-and-check: verifies status/expiry/budget, increments
    /// `uses_consumed`, records the enrolled device, and flips the token to
    /// `used` when the budget is exhausted.
    async fn consume_enrollment_token(
        &self,
        token_id: &str,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<TokenConsumption, StoreError>;

    // ── Partition lifecycle ───────────────────────────────────────────────────

    /// Create the daily partition (and its metadata row) if absent.
    /// Returns whether anything was created.
    async fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StoreError>;

    async fn list_partitions(&self) -> Result<Vec<PartitionRow>, StoreError>;
    async fn partitions_due_for_archive(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PartitionRow>, StoreError>;
    async fn droppable_partitions(&self) -> Result<Vec<PartitionRow>, StoreError>;

    /// Stream the partition's rows in canonical order (ts, then device_id).
    async fn export_partition_rows(
        &self,
        partition: &PartitionRow,
    ) -> Result<Vec<HeartbeatRow>, StoreError>;

    async fn mark_partition_archived(
        &self,
        partition_name: &str,
        row_count: i64,
        checksum_sha256: &str,
        archive_url: &str,
        archived_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn mark_partition_archive_failed(&self, partition_name: &str)
        -> Result<(), StoreError>;

    /// Drop the partition table (single DDL) and stamp the metadata row.
    /// Callers must respect [`PartitionRow::droppable`].
    async fn drop_partition(
        &self,
        partition_name: &str,
        dropped_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn refresh_partition_stats(&self) -> Result<u64, StoreError>;

    /// VACUUM (ANALYZE) active partitions younger than `days` days.
    async fn vacuum_recent_partitions(&self, days: i64) -> Result<u64, StoreError>;

    // ── Reconciliation ────────────────────────────────────────────────────────

    /// Devices whose projection is missing or strictly older than their
    /// newest heartbeat, up to `max_rows`.
    async fn stale_last_status(
        &self,
        max_rows: u32,
    ) -> Result<Vec<StaleProjection>, StoreError>;

    /// Guarded projection upsert used by the reconciler (same last-writer-
    /// wins rule as the ingest dual-write).
    async fn upsert_last_status(&self, row: &LastStatusRow) -> Result<(), StoreError>;

    // ── Advisory locks ────────────────────────────────────────────────────────

    async fn try_advisory_lock(&self, lock_id: i64) -> Result<bool, StoreError>;
    async fn advisory_unlock(&self, lock_id: i64) -> Result<(), StoreError>;

    // ── Audit events ──────────────────────────────────────────────────────────

    async fn append_device_event(
        &self,
        device_id: &DeviceId,
        event_type: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn list_device_events(
        &self,
        device_id: Option<&DeviceId>,
        limit: u32,
    ) -> Result<Vec<DeviceEventRow>, StoreError>;

    // ── Registries ────────────────────────────────────────────────────────────

    async fn list_bloatware(&self) -> Result<Vec<BloatwareRow>, StoreError>;
    async fn upsert_bloatware(&self, row: &BloatwareRow) -> Result<(), StoreError>;
    async fn remove_bloatware(&self, package_name: &str) -> Result<(), StoreError>;

    async fn get_monitoring_defaults(&self)
        -> Result<Option<MonitoringDefaults>, StoreError>;
    async fn set_monitoring_defaults(
        &self,
        defaults: &MonitoringDefaults,
    ) -> Result<(), StoreError>;
}
