use serde::{Deserialize, Serialize};

/// Raw YAML representation of the server config file.
///
/// Everything is optional here; defaults and env overrides are applied by
/// the loader before validation.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub listen_addr: Option<String>,
    pub database_url: Option<String>,
    pub admin_key: Option<String>,
    pub hmac_secret: Option<String>,

    #[serde(default)]
    pub fcm: RawFcm,
    #[serde(default)]
    pub heartbeat: RawHeartbeat,
    #[serde(default)]
    pub alerts: RawAlerts,
    #[serde(default)]
    pub monitoring: RawMonitoring,
    #[serde(default)]
    pub archive: RawArchive,
    #[serde(default)]
    pub registration: RawRegistration,

    /// Android package of the fleet agent itself (owns the batch-script temp dir).
    pub agent_package: Option<String>,
    /// The fixed unity package tracked independently of monitoring settings.
    pub unity_package: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawFcm {
    pub project_id: Option<String>,
    /// Override the provider base URL (tests / local stubs).
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawHeartbeat {
    pub bucket_seconds: Option<i64>,
    pub interval_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawAlerts {
    pub low_battery_pct: Option<i32>,
    pub unity_down_require_consecutive: Option<bool>,
    pub cooldown_minutes: Option<i64>,
    /// Optional webhook receiving raise/recover events as JSON.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawMonitoring {
    pub enabled: Option<bool>,
    pub package: Option<String>,
    pub app_name: Option<String>,
    pub threshold_min: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawArchive {
    pub retention_days: Option<i64>,
    /// Base URL of the blob store receiving partition archives.
    pub blob_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawRegistration {
    pub concurrency_limit: Option<usize>,
}
