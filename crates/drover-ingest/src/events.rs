use std::sync::Arc;

use async_trait::async_trait;
use drover_domain::DeviceId;
use drover_obs::Metrics;
use drover_store::Store;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bounded queue depth. Overflow sheds the event with a metric — ingest
/// latency is never allowed to depend on the drain worker.
const QUEUE_CAPACITY: usize = 1024;

/// Async device events produced by the ingest path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceEvent {
    StatusChange {
        from: String,
        to: String,
        offline_duration_seconds: i64,
    },
    BatteryLow { level: i32 },
    BatteryCritical { level: i32 },
    NetworkChange {
        from: String,
        to: String,
        ssid: Option<String>,
        carrier: Option<String>,
    },
    /// Auto-relaunch trigger: the monitored app is installed but down.
    RelaunchRequested { package: String },
}

impl DeviceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::StatusChange { .. } => "status_change",
            DeviceEvent::BatteryLow { .. } => "battery_low",
            DeviceEvent::BatteryCritical { .. } => "battery_critical",
            DeviceEvent::NetworkChange { .. } => "network_change",
            DeviceEvent::RelaunchRequested { .. } => "auto_relaunch_triggered",
        }
    }
}

#[derive(Debug)]
struct QueuedEvent {
    device_id: DeviceId,
    event: DeviceEvent,
}

/// Non-blocking producer handle; clone freely.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<QueuedEvent>,
    metrics: Arc<Metrics>,
}

impl EventQueue {
    /// Enqueue without blocking. A full queue drops the event and counts it.
    pub fn enqueue(&self, device_id: &DeviceId, event: DeviceEvent) {
        let queued = QueuedEvent { device_id: device_id.clone(), event };
        if self.tx.try_send(queued).is_err() {
            self.metrics.event_queue_dropped_total.inc();
            warn!("event queue full, shedding event");
        }
    }
}

/// Consumer of relaunch requests; implemented over the command dispatcher at
/// composition time so the ingest crate stays independent of it.
#[async_trait]
pub trait RelaunchSink: Send + Sync {
    async fn relaunch(&self, device_id: &DeviceId, package: &str);
}

/// Spawn the drain worker. Events are persisted to the audit log;
/// relaunch requests are additionally forwarded to `relaunch`.
pub fn spawn_event_drain(
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    relaunch: Option<Arc<dyn RelaunchSink>>,
) -> EventQueue {
    let (tx, mut rx) = mpsc::channel::<QueuedEvent>(QUEUE_CAPACITY);
    let queue = EventQueue { tx, metrics };

    tokio::spawn(async move {
        while let Some(QueuedEvent { device_id, event }) = rx.recv().await {
            let details = serde_json::to_value(&event).unwrap_or_else(|_| json!({}));
            if let Err(e) = store
                .append_device_event(&device_id, event.event_type(), details)
                .await
            {
                warn!(device_id = %device_id, error = %e, "event append failed");
            }

            if let DeviceEvent::RelaunchRequested { package } = &event {
                match &relaunch {
                    Some(sink) => sink.relaunch(&device_id, package).await,
                    None => debug!(device_id = %device_id, "relaunch requested but no sink wired"),
                }
            }
        }
    });

    queue
}
