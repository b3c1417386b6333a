pub mod error;
pub mod telemetry;
pub mod types;

mod tests;

pub use error::{validate_alias, DomainError};
pub use telemetry::{
    AppVersionInfo, BatteryInfo, HeartbeatPayload, MemoryInfo, NetworkInfo,
    bucket_end, bucket_start, service_state, unity_state, UNITY_THRESHOLD_MIN,
};
pub use types::{
    bulk_correlation_id, AlertCondition, AlertStateKind, CommandAction, DeviceId,
    EffectiveMonitoring, ExecId, ExecMode, FcmStatus, MonitoringDefaults,
    MonitoringOverrides, MonitoringSource, PartitionLifecycle, TokenStatus,
};
