use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Fixed threshold for the unity liveness derivation, in minutes.
pub const UNITY_THRESHOLD_MIN: i64 = 10;

// ── Wire payload ──────────────────────────────────────────────────────────────
//
// Unknown fields are ignored; every section is optional so a sparse agent
// build still produces a valid submission. Schema violations (wrong types)
// surface as 422 at the API boundary.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub battery: Option<BatteryInfo>,
    #[serde(default)]
    pub network: Option<NetworkInfo>,
    #[serde(default)]
    pub memory: Option<MemoryInfo>,
    #[serde(default)]
    pub uptime_s: Option<i64>,
    /// Installed-app map keyed by package name.
    #[serde(default)]
    pub app_versions: HashMap<String, AppVersionInfo>,
    /// Seconds since the monitored package was last in the foreground.
    /// Negative values are an agent-side sentinel for "unavailable".
    #[serde(default)]
    pub monitored_foreground_recent_s: Option<i64>,
    /// Agent build reporting this heartbeat.
    #[serde(default)]
    pub app_version: Option<String>,
    /// Rotated push endpoint, when the agent has a fresh one.
    #[serde(default)]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryInfo {
    #[serde(default)]
    pub pct: Option<i32>,
    #[serde(default)]
    pub charging: Option<bool>,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub signal_dbm: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default)]
    pub total_ram_mb: Option<i64>,
    #[serde(default)]
    pub avail_ram_mb: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppVersionInfo {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub version_name: Option<String>,
}

impl HeartbeatPayload {
    /// RAM in use, when the agent reported both totals.
    pub fn ram_used_mb(&self) -> Option<i64> {
        let mem = self.memory.as_ref()?;
        Some(mem.total_ram_mb? - mem.avail_ram_mb?)
    }

    /// Whether `package` is reported installed: `Some(true)` / `Some(false)`
    /// when the agent listed it, `None` when it said nothing.
    pub fn installed(&self, package: &str) -> Option<bool> {
        self.app_versions.get(package).map(|a| a.installed)
    }
}

// ── Bucket math ───────────────────────────────────────────────────────────────

/// Floor `ts` to the start of its dedup bucket: `[floor(t, n), floor(t, n) + n)`.
pub fn bucket_start(ts: DateTime<Utc>, bucket_seconds: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(bucket_seconds);
    Utc.timestamp_opt(floored, 0).unwrap()
}

/// End of the bucket containing `ts` (exclusive).
pub fn bucket_end(ts: DateTime<Utc>, bucket_seconds: i64) -> DateTime<Utc> {
    bucket_start(ts, bucket_seconds) + Duration::seconds(bucket_seconds)
}

// ── Derived liveness ──────────────────────────────────────────────────────────

/// Service liveness from installation state and foreground recency.
///
/// | installed        | foreground_recent_s | result        |
/// |------------------|---------------------|---------------|
/// | `false` / `None` | —                   | `None`        |
/// | `true`           | `None` or `< 0`     | `None`        |
/// | `true`           | `<= threshold·60`   | `Some(true)`  |
/// | `true`           | `> threshold·60`    | `Some(false)` |
pub fn service_state(
    installed: Option<bool>,
    foreground_recent_s: Option<i64>,
    threshold_min: i64,
) -> Option<bool> {
    if installed != Some(true) {
        return None;
    }
    let fg = foreground_recent_s.filter(|s| *s >= 0)?;
    Some(fg <= threshold_min * 60)
}

/// Unity liveness: the same rule pinned to the fixed unity package threshold.
pub fn unity_state(installed: Option<bool>, foreground_recent_s: Option<i64>) -> Option<bool> {
    service_state(installed, foreground_recent_s, UNITY_THRESHOLD_MIN)
}
