use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(s: impl Into<String>) -> Self {
        DeviceId(s.into())
    }

    /// Mint a fresh random device identifier.
    pub fn generate() -> Self {
        DeviceId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecId(pub String);

impl ExecId {
    pub fn new(s: impl Into<String>) -> Self {
        ExecId(s.into())
    }

    pub fn generate() -> Self {
        ExecId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation ID for one device's slice of a bulk dispatch.
///
/// Device replies echo this back; the ack path recomputes it from the
/// authenticated device and rejects anything else.
pub fn bulk_correlation_id(exec_id: &ExecId, device_id: &DeviceId) -> String {
    format!("{}-{}", exec_id, device_id)
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Commands the control plane can push to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Ping,
    Ring,
    LaunchApp,
    Reboot,
    RestartApp,
    WifiConnect,
    RemoteExecFcm,
    RemoteExecShell,
}

impl CommandAction {
    /// Wire name as embedded in the push data payload and the HMAC string.
    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandAction::Ping => "ping",
            CommandAction::Ring => "ring",
            CommandAction::LaunchApp => "launch_app",
            CommandAction::Reboot => "reboot",
            CommandAction::RestartApp => "restart_app",
            CommandAction::WifiConnect => "wifi_connect",
            CommandAction::RemoteExecFcm => "remote_exec_fcm",
            CommandAction::RemoteExecShell => "remote_exec_shell",
        }
    }

    /// Parse an action path segment from the admin command API.
    /// Remote-exec actions are not addressable that way.
    pub fn from_route(s: &str) -> Option<Self> {
        match s {
            "ping" => Some(CommandAction::Ping),
            "ring" => Some(CommandAction::Ring),
            "launch_app" => Some(CommandAction::LaunchApp),
            "reboot" => Some(CommandAction::Reboot),
            "restart_app" => Some(CommandAction::RestartApp),
            "wifi_connect" => Some(CommandAction::WifiConnect),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Delivery state of a dispatch ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FcmStatus {
    Pending,
    Sent,
    Failed,
    Completed,
}

impl FcmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FcmStatus::Pending => "pending",
            FcmStatus::Sent => "sent",
            FcmStatus::Failed => "failed",
            FcmStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for FcmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    Fcm,
    Shell,
}

impl ExecMode {
    pub fn action(&self) -> CommandAction {
        match self {
            ExecMode::Fcm => CommandAction::RemoteExecFcm,
            ExecMode::Shell => CommandAction::RemoteExecShell,
        }
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Fcm => write!(f, "fcm"),
            ExecMode::Shell => write!(f, "shell"),
        }
    }
}

/// Conditions tracked per device by the alert evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Offline,
    LowBattery,
    UnityDown,
    ServiceDown,
}

impl AlertCondition {
    pub const ALL: [AlertCondition; 4] = [
        AlertCondition::Offline,
        AlertCondition::LowBattery,
        AlertCondition::UnityDown,
        AlertCondition::ServiceDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Offline => "offline",
            AlertCondition::LowBattery => "low_battery",
            AlertCondition::UnityDown => "unity_down",
            AlertCondition::ServiceDown => "service_down",
        }
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStateKind {
    Ok,
    Raised,
}

impl AlertStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStateKind::Ok => "ok",
            AlertStateKind::Raised => "raised",
        }
    }
}

impl std::fmt::Display for AlertStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a daily heartbeat partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionLifecycle {
    Active,
    Archived,
    ArchiveFailed,
    Dropped,
}

impl PartitionLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionLifecycle::Active => "active",
            PartitionLifecycle::Archived => "archived",
            PartitionLifecycle::ArchiveFailed => "archive_failed",
            PartitionLifecycle::Dropped => "dropped",
        }
    }
}

impl std::fmt::Display for PartitionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Revoked,
    Used,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Revoked => "revoked",
            TokenStatus::Used => "used",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Monitoring settings ───────────────────────────────────────────────────────

/// Fleet-wide monitoring defaults, applied to devices that have not opted
/// into per-device overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringDefaults {
    pub enabled: bool,
    pub package: String,
    pub app_name: String,
    pub threshold_min: i64,
}

/// Per-device monitoring columns as stored on the device row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringOverrides {
    pub monitor_enabled: bool,
    pub monitored_package: String,
    pub monitored_app_name: String,
    pub monitored_threshold_min: i64,
    pub monitoring_use_defaults: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringSource {
    Device,
    Defaults,
}

/// The settings actually used to evaluate a device: per-device overrides
/// when the device opted out of defaults, the fleet defaults otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveMonitoring {
    pub enabled: bool,
    pub package: String,
    pub app_name: String,
    pub threshold_min: i64,
    pub source: MonitoringSource,
}

impl EffectiveMonitoring {
    pub fn resolve(overrides: &MonitoringOverrides, defaults: &MonitoringDefaults) -> Self {
        if overrides.monitoring_use_defaults {
            EffectiveMonitoring {
                enabled: defaults.enabled,
                package: defaults.package.clone(),
                app_name: defaults.app_name.clone(),
                threshold_min: defaults.threshold_min,
                source: MonitoringSource::Defaults,
            }
        } else {
            EffectiveMonitoring {
                enabled: overrides.monitor_enabled,
                package: overrides.monitored_package.clone(),
                app_name: overrides.monitored_app_name.clone(),
                threshold_min: overrides.monitored_threshold_min,
                source: MonitoringSource::Device,
            }
        }
    }
}
