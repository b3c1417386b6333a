use chrono::{DateTime, Utc};
use drover_domain::{
    AlertCondition, AlertStateKind, CommandAction, DeviceId, ExecId, ExecMode, FcmStatus,
    MonitoringOverrides, PartitionLifecycle, TokenStatus,
};
use serde::{Deserialize, Serialize};

// ── Devices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRow {
    pub id: DeviceId,
    pub alias: String,
    /// `v1$<salt_hex>$<sha256_hex>` over the device bearer secret.
    pub token_hash: String,
    /// Indexed short fingerprint of the secret; `None` on legacy rows until
    /// their first successful authentication backfills it.
    pub token_id: Option<String>,
    pub token_revoked_at: Option<DateTime<Utc>>,
    pub fcm_token: Option<String>,
    pub agent_version: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub monitoring: MonitoringOverrides,
    pub auto_relaunch_enabled: bool,
}

// ── Heartbeats ────────────────────────────────────────────────────────────────

/// One immutable history row. `bucket_ts` is the floor of `ts` to the dedup
/// window and carries the uniqueness guarantee together with `device_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRow {
    pub device_id: DeviceId,
    pub ts: DateTime<Utc>,
    pub bucket_ts: DateTime<Utc>,
    pub ip: Option<String>,
    pub status: String,
    pub battery_pct: Option<i32>,
    pub plugged: Option<bool>,
    pub temp_c: Option<i32>,
    pub network_type: Option<String>,
    pub signal_dbm: Option<i32>,
    pub uptime_s: Option<i64>,
    pub ram_used_mb: Option<i64>,
    pub unity_pkg_version: Option<String>,
    pub unity_running: Option<bool>,
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastStatusRow {
    pub device_id: DeviceId,
    pub last_ts: DateTime<Utc>,
    pub battery_pct: Option<i32>,
    pub network_type: Option<String>,
    pub unity_running: Option<bool>,
    pub signal_dbm: Option<i32>,
    pub agent_version: Option<String>,
    pub ip: Option<String>,
    pub status: String,
    pub service_up: Option<bool>,
    pub monitored_foreground_recent_s: Option<i64>,
    pub monitored_package: Option<String>,
    pub monitored_threshold_min: Option<i64>,
}

/// Result of the transactional dual-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatWrite {
    /// Whether a history row was inserted (false = bucket dedup hit).
    pub created: bool,
}

// ── Dispatch ledger ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRow {
    pub request_id: String,
    pub device_id: DeviceId,
    pub action: CommandAction,
    /// Present when this dispatch is one device's slice of a bulk exec.
    pub exec_id: Option<ExecId>,
    pub payload_hash: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub latency_ms: Option<i64>,
    pub fcm_message_id: Option<String>,
    pub http_code: Option<i32>,
    pub fcm_status: FcmStatus,
    pub error_msg: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub result_message: Option<String>,
    pub retries: i32,
}

/// Fields known before the provider call; everything else starts empty.
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub request_id: String,
    pub device_id: DeviceId,
    pub action: CommandAction,
    pub exec_id: Option<ExecId>,
    pub payload_hash: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl NewDispatch {
    pub fn into_row(self) -> DispatchRow {
        DispatchRow {
            request_id: self.request_id,
            device_id: self.device_id,
            action: self.action,
            exec_id: self.exec_id,
            payload_hash: self.payload_hash,
            sent_at: self.sent_at,
            latency_ms: None,
            fcm_message_id: None,
            http_code: None,
            fcm_status: FcmStatus::Pending,
            error_msg: None,
            completed_at: None,
            result: None,
            result_message: None,
            retries: 0,
        }
    }
}

/// Provider outcome recorded after the push call.
#[derive(Debug, Clone)]
pub enum DispatchUpdate {
    Sent {
        http_code: i32,
        fcm_message_id: Option<String>,
        latency_ms: i64,
    },
    Failed {
        http_code: Option<i32>,
        error_msg: String,
        latency_ms: Option<i64>,
    },
}

/// Outcome of an ACK write against the write-once `completed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Completed,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecBatchRow {
    pub exec_id: ExecId,
    pub mode: ExecMode,
    pub payload_hash: String,
    pub created_by: String,
    pub status: String,
    pub total_targets: i64,
    pub sent_count: i64,
    pub acked_count: i64,
    pub error_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Alert state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStateRow {
    pub device_id: DeviceId,
    pub condition: AlertCondition,
    pub state: AlertStateKind,
    pub last_raised_at: Option<DateTime<Utc>>,
    pub last_recovered_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_violations: i32,
    pub last_value: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ── Enrollment tokens ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentTokenRow {
    pub token_id: String,
    pub token_hash: String,
    pub alias: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub uses_allowed: i32,
    pub uses_consumed: i32,
    pub status: TokenStatus,
    pub device_id: Option<DeviceId>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Result of the atomic consume-and-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenConsumption {
    Consumed,
    Expired,
    Exhausted,
    Revoked,
}

// ── Partitions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionRow {
    pub partition_name: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub state: PartitionLifecycle,
    pub row_count: Option<i64>,
    pub bytes_size: Option<i64>,
    pub checksum_sha256: Option<String>,
    pub archive_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub dropped_at: Option<DateTime<Utc>>,
}

impl PartitionRow {
    /// Drop gate: archived with both the archive URL and checksum recorded.
    pub fn droppable(&self) -> bool {
        self.state == PartitionLifecycle::Archived
            && self.archive_url.is_some()
            && self.checksum_sha256.is_some()
    }
}

/// Naming scheme for daily partitions: `device_heartbeats_YYYYMMDD`.
pub fn partition_name_for(day: chrono::NaiveDate) -> String {
    format!("device_heartbeats_{}", day.format("%Y%m%d"))
}

// ── Audit / events ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEventRow {
    pub id: i64,
    pub device_id: DeviceId,
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub details: serde_json::Value,
}

// ── Bloatware registry ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloatwareRow {
    pub package_name: String,
    pub app_name: String,
    pub enabled: bool,
    pub added_at: DateTime<Utc>,
}

// ── Reconciliation ────────────────────────────────────────────────────────────

/// A device whose last-status projection trails its heartbeat history.
#[derive(Debug, Clone)]
pub struct StaleProjection {
    pub device_id: DeviceId,
    /// Newest heartbeat in history for the device.
    pub latest: HeartbeatRow,
    /// The projection's current timestamp; `None` when the row is missing.
    pub stale_ts: Option<DateTime<Utc>>,
}
