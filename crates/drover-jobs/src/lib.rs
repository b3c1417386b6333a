pub mod alerts;
pub mod blob;
pub mod error;
pub mod partitions;
pub mod reconcile;
pub mod scheduler;

pub use alerts::{
    AlertEvaluator, AlertEvaluatorConfig, AlertEvent, AlertNotifier, AlertTransition,
    TickReport, TracingNotifier, WebhookNotifier,
};
pub use blob::{BlobStore, HttpBlobStore, MemoryBlobStore};
pub use error::JobError;
pub use partitions::{run_nightly, NightlyOptions, NightlyReport, CREATE_AHEAD_DAYS};
pub use reconcile::{run_reconcile, ReconcileOptions, ReconcileReport};
pub use scheduler::{spawn_alert_loop, spawn_nightly_loop, spawn_reconcile_loop};

/// Advisory lock ids. One holder fleet-wide per job; contenders skip.
pub const NIGHTLY_LOCK_ID: i64 = 987_654_321;
pub const RECONCILE_LOCK_ID: i64 = 987_654_322;
