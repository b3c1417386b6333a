use std::path::Path;

use drover_domain::MonitoringDefaults;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub database_url: Option<String>,
    pub admin_key: String,
    pub hmac_secret: String,

    pub fcm: FcmConfig,
    pub heartbeat: HeartbeatConfig,
    pub alerts: AlertConfig,
    pub archive: ArchiveConfig,

    /// Seed applied to newly registered devices and used as the fleet
    /// fallback when a device keeps `monitoring_use_defaults`.
    pub monitoring_defaults: MonitoringDefaults,

    pub registration_concurrency: usize,
    pub agent_package: String,
    pub unity_package: String,
}

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    /// Provider base URL; `None` means the public FCM endpoint.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub bucket_seconds: i64,
    pub interval_seconds: i64,
}

impl HeartbeatConfig {
    /// Gap after which a device counts as offline: three missed intervals.
    pub fn offline_threshold_seconds(&self) -> i64 {
        self.interval_seconds * 3
    }
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub low_battery_pct: i32,
    pub unity_down_require_consecutive: bool,
    pub cooldown_minutes: i64,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub retention_days: i64,
    pub blob_base_url: Option<String>,
}

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_BUCKET_SECONDS: i64 = 10;
const DEFAULT_INTERVAL_SECONDS: i64 = 600;
const DEFAULT_LOW_BATTERY_PCT: i32 = 15;
const DEFAULT_COOLDOWN_MINUTES: i64 = 30;
const DEFAULT_RETENTION_DAYS: i64 = 2;
const DEFAULT_REGISTRATION_LIMIT: usize = 15;
const DEFAULT_MONITORED_PACKAGE: &str = "org.zwanoo.android.speedtest";
const DEFAULT_MONITORED_APP: &str = "Speedtest";
const DEFAULT_THRESHOLD_MIN: i64 = 10;
const DEFAULT_AGENT_PACKAGE: &str = "com.drover.agent";
const DEFAULT_UNITY_PACKAGE: &str = "com.unitynetwork.unityapp";

/// Load configuration from an optional YAML file, then apply environment
/// overrides and validate.
///
/// Env overrides (highest precedence): `DATABASE_URL`, `DROVER_LISTEN_ADDR`,
/// `DROVER_ADMIN_KEY`, `HMAC_SECRET`, `FCM_PROJECT_ID`, `FCM_ENDPOINT`,
/// `DROVER_WEBHOOK_URL`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut raw = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Io {
                path: p.display().to_string(),
                source: e,
            })?;
            debug!("loading config from {}", p.display());
            serde_yaml::from_str::<RawConfig>(&content).map_err(|e| ConfigError::YamlParse {
                path: p.display().to_string(),
                source: e,
            })?
        }
        None => RawConfig::default(),
    };

    apply_env_overrides(&mut raw);
    validate(raw)
}

fn apply_env_overrides(raw: &mut RawConfig) {
    if let Ok(v) = std::env::var("DATABASE_URL") {
        raw.database_url = Some(v);
    }
    if let Ok(v) = std::env::var("DROVER_LISTEN_ADDR") {
        raw.listen_addr = Some(v);
    }
    if let Ok(v) = std::env::var("DROVER_ADMIN_KEY") {
        raw.admin_key = Some(v);
    }
    if let Ok(v) = std::env::var("HMAC_SECRET") {
        raw.hmac_secret = Some(v);
    }
    if let Ok(v) = std::env::var("FCM_PROJECT_ID") {
        raw.fcm.project_id = Some(v);
    }
    if let Ok(v) = std::env::var("FCM_ENDPOINT") {
        raw.fcm.endpoint = Some(v);
    }
    if let Ok(v) = std::env::var("DROVER_WEBHOOK_URL") {
        raw.alerts.webhook_url = Some(v);
    }
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    let admin_key = raw
        .admin_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::Missing("admin_key (DROVER_ADMIN_KEY)".into()))?;
    let hmac_secret = raw
        .hmac_secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::Missing("hmac_secret (HMAC_SECRET)".into()))?;

    let bucket_seconds = raw.heartbeat.bucket_seconds.unwrap_or(DEFAULT_BUCKET_SECONDS);
    if bucket_seconds <= 0 {
        return Err(ConfigError::Invalid("heartbeat.bucket_seconds must be positive".into()));
    }
    let interval_seconds = raw
        .heartbeat
        .interval_seconds
        .unwrap_or(DEFAULT_INTERVAL_SECONDS);
    if interval_seconds <= 0 {
        return Err(ConfigError::Invalid("heartbeat.interval_seconds must be positive".into()));
    }

    // Default retention stays at 2 days; an explicitly configured value
    // must land in the supported 7–365 window.
    let retention_days = match raw.archive.retention_days {
        None => DEFAULT_RETENTION_DAYS,
        Some(d) if (7..=365).contains(&d) => d,
        Some(d) => {
            return Err(ConfigError::Invalid(format!(
                "archive.retention_days must be between 7 and 365, got {d}"
            )))
        }
    };

    let threshold_min = raw.monitoring.threshold_min.unwrap_or(DEFAULT_THRESHOLD_MIN);
    if threshold_min <= 0 {
        return Err(ConfigError::Invalid("monitoring.threshold_min must be positive".into()));
    }

    let registration_concurrency = raw
        .registration
        .concurrency_limit
        .unwrap_or(DEFAULT_REGISTRATION_LIMIT);
    if registration_concurrency == 0 {
        return Err(ConfigError::Invalid(
            "registration.concurrency_limit must be at least 1".into(),
        ));
    }

    Ok(Config {
        listen_addr: raw.listen_addr.unwrap_or_else(|| DEFAULT_LISTEN.into()),
        database_url: raw.database_url,
        admin_key,
        hmac_secret,
        fcm: FcmConfig {
            project_id: raw
                .fcm
                .project_id
                .ok_or_else(|| ConfigError::Missing("fcm.project_id (FCM_PROJECT_ID)".into()))?,
            endpoint: raw.fcm.endpoint,
        },
        heartbeat: HeartbeatConfig { bucket_seconds, interval_seconds },
        alerts: AlertConfig {
            low_battery_pct: raw.alerts.low_battery_pct.unwrap_or(DEFAULT_LOW_BATTERY_PCT),
            unity_down_require_consecutive: raw
                .alerts
                .unity_down_require_consecutive
                .unwrap_or(false),
            cooldown_minutes: raw.alerts.cooldown_minutes.unwrap_or(DEFAULT_COOLDOWN_MINUTES),
            webhook_url: raw.alerts.webhook_url,
        },
        archive: ArchiveConfig {
            retention_days,
            blob_base_url: raw.archive.blob_base_url,
        },
        monitoring_defaults: MonitoringDefaults {
            enabled: raw.monitoring.enabled.unwrap_or(true),
            package: raw
                .monitoring
                .package
                .unwrap_or_else(|| DEFAULT_MONITORED_PACKAGE.into()),
            app_name: raw
                .monitoring
                .app_name
                .unwrap_or_else(|| DEFAULT_MONITORED_APP.into()),
            threshold_min,
        },
        registration_concurrency,
        agent_package: raw
            .agent_package
            .unwrap_or_else(|| DEFAULT_AGENT_PACKAGE.into()),
        unity_package: raw
            .unity_package
            .unwrap_or_else(|| DEFAULT_UNITY_PACKAGE.into()),
    })
}
