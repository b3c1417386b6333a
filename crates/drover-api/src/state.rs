use std::sync::Arc;

use drover_dispatch::{AckReceiver, Dispatcher};
use drover_domain::MonitoringDefaults;
use drover_ingest::{Ingestor, RegistrationGate};
use drover_jobs::BlobStore;
use drover_obs::Metrics;
use drover_store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub ingestor: Arc<Ingestor>,
    pub gate: Arc<RegistrationGate>,
    pub dispatcher: Arc<Dispatcher>,
    pub acks: Arc<AckReceiver>,
    pub blob: Arc<dyn BlobStore>,
    pub metrics: Arc<Metrics>,
    pub admin_key: Arc<String>,
    /// Fallback when the store has no monitoring-defaults row yet.
    pub monitoring_defaults: MonitoringDefaults,
    pub retention_days: i64,
}
