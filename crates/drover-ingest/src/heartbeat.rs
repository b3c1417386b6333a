use std::sync::Arc;

use chrono::Utc;
use drover_domain::{
    bucket_start, service_state, unity_state, EffectiveMonitoring, HeartbeatPayload,
    MonitoringDefaults,
};
use drover_obs::Metrics;
use drover_store::{DeviceRow, HeartbeatRow, LastStatusRow, Store};
use tracing::{info, warn};

use crate::auth::authenticate_device;
use crate::error::IngestError;
use crate::events::{DeviceEvent, EventQueue};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub bucket_seconds: i64,
    pub interval_seconds: i64,
    pub unity_package: String,
    /// Fleet defaults used when the store has no explicit row yet.
    pub default_monitoring: MonitoringDefaults,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatOutcome {
    /// Whether a history row was written (false = bucket dedup hit).
    pub created: bool,
}

/// C3 — authenticate, dedupe, dual-write, and emit async events.
pub struct Ingestor {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    events: EventQueue,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn Store>,
        metrics: Arc<Metrics>,
        events: EventQueue,
        config: IngestConfig,
    ) -> Self {
        Self { store, metrics, events, config }
    }

    /// Accept one telemetry submission from a device bearer.
    pub async fn ingest(
        &self,
        secret: &str,
        payload: HeartbeatPayload,
        peer_ip: Option<String>,
    ) -> Result<HeartbeatOutcome, IngestError> {
        let device = authenticate_device(self.store.as_ref(), secret).await?;

        if let Some(revoked_at) = device.token_revoked_at {
            warn!(
                device_id = %device.id,
                revoked_at = %revoked_at,
                "heartbeat rejected: device deleted"
            );
            return Err(IngestError::DeviceDeleted { revoked_at });
        }

        let now = Utc::now();
        self.metrics.heartbeats_ingested_total.inc();

        let monitoring = self.effective_monitoring(&device).await;
        let derived = self.derive(&payload, &monitoring);

        // Previous sample must be read before the dual-write overwrites it.
        let prev = self.store.get_last_status(&device.id).await?;

        let hb = self.history_row(&device, &payload, &derived, peer_ip.clone(), now);
        let last = self.projection_row(&device, &payload, &derived, &monitoring, peer_ip, now);

        let write_start = std::time::Instant::now();
        let write = self.store.record_heartbeat(&hb, &last).await?;
        self.metrics
            .hb_write_latency_ms
            .observe(write_start.elapsed().as_millis() as f64);

        if write.created {
            self.metrics.hb_writes_total.inc();
        } else {
            self.metrics.hb_dedupe_total.inc();
        }
        self.metrics.last_status_upserts_total.inc();

        self.emit_transition_events(&device, &payload, prev.as_ref(), now);

        self.store
            .touch_device(
                &device.id,
                now,
                payload.fcm_token.as_deref(),
                payload.app_version.as_deref(),
            )
            .await?;

        // Auto-relaunch: enabled, app installed, monitored service down.
        if device.auto_relaunch_enabled
            && monitoring.enabled
            && payload.installed(&monitoring.package) == Some(true)
            && derived.service_up == Some(false)
        {
            info!(
                device_id = %device.id,
                package = %monitoring.package,
                "service down with auto-relaunch enabled, queueing launch"
            );
            self.events.enqueue(
                &device.id,
                DeviceEvent::RelaunchRequested { package: monitoring.package.clone() },
            );
        }

        info!(
            device_id = %device.id,
            alias = %device.alias,
            created = write.created,
            battery_pct = ?payload.battery.as_ref().and_then(|b| b.pct),
            "heartbeat ingested"
        );

        Ok(HeartbeatOutcome { created: write.created })
    }

    async fn effective_monitoring(&self, device: &DeviceRow) -> EffectiveMonitoring {
        let defaults = match self.store.get_monitoring_defaults().await {
            Ok(Some(d)) => d,
            Ok(None) => self.config.default_monitoring.clone(),
            Err(e) => {
                // Settings failures degrade to the static defaults rather
                // than failing the submission.
                warn!(device_id = %device.id, error = %e, "monitoring defaults unavailable");
                self.config.default_monitoring.clone()
            }
        };
        EffectiveMonitoring::resolve(&device.monitoring, &defaults)
    }

    fn derive(&self, payload: &HeartbeatPayload, monitoring: &EffectiveMonitoring) -> Derived {
        // Negative foreground recency is the agent's "unavailable" sentinel.
        let foreground_s = payload.monitored_foreground_recent_s.filter(|s| *s >= 0);

        let service_up = if monitoring.enabled && !monitoring.package.is_empty() {
            service_state(
                payload.installed(&monitoring.package),
                foreground_s,
                monitoring.threshold_min,
            )
        } else {
            None
        };

        let unity_installed = payload.installed(&self.config.unity_package);
        let unity_running = unity_state(unity_installed, foreground_s);
        let unity_pkg_version = payload
            .app_versions
            .get(&self.config.unity_package)
            .filter(|a| a.installed)
            .and_then(|a| a.version_name.clone());

        Derived { service_up, foreground_s, unity_running, unity_pkg_version }
    }

    fn history_row(
        &self,
        device: &DeviceRow,
        payload: &HeartbeatPayload,
        derived: &Derived,
        peer_ip: Option<String>,
        now: chrono::DateTime<Utc>,
    ) -> HeartbeatRow {
        let network = payload.network.as_ref();
        HeartbeatRow {
            device_id: device.id.clone(),
            ts: now,
            bucket_ts: bucket_start(now, self.config.bucket_seconds),
            ip: network.and_then(|n| n.ip.clone()).or(peer_ip),
            status: payload.status.clone().unwrap_or_else(|| "ok".into()),
            battery_pct: payload.battery.as_ref().and_then(|b| b.pct),
            plugged: payload.battery.as_ref().and_then(|b| b.charging),
            temp_c: payload
                .battery
                .as_ref()
                .and_then(|b| b.temperature_c)
                .map(|t| t as i32),
            network_type: network.and_then(|n| n.transport.clone()),
            signal_dbm: network.and_then(|n| n.signal_dbm),
            uptime_s: payload.uptime_s,
            ram_used_mb: payload.ram_used_mb(),
            unity_pkg_version: derived.unity_pkg_version.clone(),
            unity_running: derived.unity_running,
            agent_version: payload.app_version.clone(),
        }
    }

    fn projection_row(
        &self,
        device: &DeviceRow,
        payload: &HeartbeatPayload,
        derived: &Derived,
        monitoring: &EffectiveMonitoring,
        peer_ip: Option<String>,
        now: chrono::DateTime<Utc>,
    ) -> LastStatusRow {
        let network = payload.network.as_ref();
        LastStatusRow {
            device_id: device.id.clone(),
            last_ts: now,
            battery_pct: payload.battery.as_ref().and_then(|b| b.pct),
            network_type: network.and_then(|n| n.transport.clone()),
            unity_running: derived.unity_running,
            signal_dbm: network.and_then(|n| n.signal_dbm),
            agent_version: payload.app_version.clone(),
            ip: network.and_then(|n| n.ip.clone()).or(peer_ip),
            status: payload.status.clone().unwrap_or_else(|| "ok".into()),
            service_up: derived.service_up,
            monitored_foreground_recent_s: derived.foreground_s,
            monitored_package: monitoring.enabled.then(|| monitoring.package.clone()),
            monitored_threshold_min: monitoring.enabled.then_some(monitoring.threshold_min),
        }
    }

    /// Status/battery/network transitions against the pre-write projection,
    /// queued without blocking.
    fn emit_transition_events(
        &self,
        device: &DeviceRow,
        payload: &HeartbeatPayload,
        prev: Option<&LastStatusRow>,
        now: chrono::DateTime<Utc>,
    ) {
        let offline_threshold = self.config.interval_seconds * 3;
        let offline_seconds = (now - device.last_seen).num_seconds();
        if offline_seconds > offline_threshold {
            self.events.enqueue(
                &device.id,
                DeviceEvent::StatusChange {
                    from: "offline".into(),
                    to: "online".into(),
                    offline_duration_seconds: offline_seconds,
                },
            );
        }

        let new_battery = payload.battery.as_ref().and_then(|b| b.pct);
        if let (Some(prev_pct), Some(new_pct)) =
            (prev.and_then(|p| p.battery_pct), new_battery)
        {
            if prev_pct >= 20 && new_pct < 20 {
                self.events
                    .enqueue(&device.id, DeviceEvent::BatteryLow { level: new_pct });
            }
            if prev_pct >= 15 && new_pct < 15 {
                self.events
                    .enqueue(&device.id, DeviceEvent::BatteryCritical { level: new_pct });
            }
        }

        let new_network = payload.network.as_ref().and_then(|n| n.transport.clone());
        if let (Some(prev_net), Some(new_net)) =
            (prev.and_then(|p| p.network_type.clone()), new_network)
        {
            if prev_net != new_net {
                let network = payload.network.as_ref();
                self.events.enqueue(
                    &device.id,
                    DeviceEvent::NetworkChange {
                        from: prev_net,
                        to: new_net.clone(),
                        ssid: (new_net == "wifi")
                            .then(|| network.and_then(|n| n.ssid.clone()))
                            .flatten(),
                        carrier: (new_net == "cellular")
                            .then(|| network.and_then(|n| n.carrier.clone()))
                            .flatten(),
                    },
                );
            }
        }
    }
}

struct Derived {
    service_up: Option<bool>,
    foreground_s: Option<i64>,
    unity_running: Option<bool>,
    unity_pkg_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{hash_secret, token_fingerprint};
    use crate::events::spawn_event_drain;
    use drover_domain::{AppVersionInfo, BatteryInfo, DeviceId, MonitoringOverrides};
    use drover_store::InMemoryStore;

    const SECRET: &str = "test-device-secret";

    fn config() -> IngestConfig {
        IngestConfig {
            bucket_seconds: 10,
            interval_seconds: 600,
            unity_package: "com.unitynetwork.unityapp".into(),
            default_monitoring: MonitoringDefaults {
                enabled: true,
                package: "com.example.app".into(),
                app_name: "Example".into(),
                threshold_min: 10,
            },
        }
    }

    async fn seeded_store(auto_relaunch: bool) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_device(&DeviceRow {
                id: DeviceId::new("d1"),
                alias: "kiosk-1".into(),
                token_hash: hash_secret(SECRET),
                token_id: Some(token_fingerprint(SECRET)),
                token_revoked_at: None,
                fcm_token: Some("push-token".into()),
                agent_version: None,
                last_seen: Utc::now(),
                created_at: Utc::now(),
                monitoring: MonitoringOverrides {
                    monitor_enabled: true,
                    monitored_package: "com.example.app".into(),
                    monitored_app_name: "Example".into(),
                    monitored_threshold_min: 10,
                    monitoring_use_defaults: true,
                },
                auto_relaunch_enabled: auto_relaunch,
            })
            .await
            .unwrap();
        store
    }

    fn ingestor(store: Arc<InMemoryStore>) -> Ingestor {
        let metrics = Metrics::new().unwrap();
        let events = spawn_event_drain(store.clone(), metrics.clone(), None);
        Ingestor::new(store, metrics, events, config())
    }

    fn payload_with_battery(pct: i32) -> HeartbeatPayload {
        HeartbeatPayload {
            battery: Some(BatteryInfo { pct: Some(pct), charging: Some(false), temperature_c: None }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_heartbeat_creates_history_and_projection() {
        let store = seeded_store(false).await;
        let ing = ingestor(store.clone());

        let outcome = ing
            .ingest(SECRET, payload_with_battery(80), Some("10.0.0.9".into()))
            .await
            .unwrap();
        assert!(outcome.created);

        let ls = store.get_last_status(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert_eq!(ls.battery_pct, Some(80));
        assert_eq!(ls.ip.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn repeat_submissions_in_bucket_dedupe_but_refresh_projection() {
        let store = seeded_store(false).await;
        let ing = ingestor(store.clone());

        let first = ing.ingest(SECRET, payload_with_battery(80), None).await.unwrap();
        let second = ing.ingest(SECRET, payload_with_battery(79), None).await.unwrap();

        // The second submission may land in the next bucket if the clock
        // crosses a boundary; when it does not, it must dedupe.
        if !second.created {
            assert!(first.created);
        }
        let ls = store.get_last_status(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert_eq!(ls.battery_pct, Some(79));
    }

    #[tokio::test]
    async fn revoked_device_gets_device_deleted() {
        let seeded = seeded_store(false).await;
        let mut device = seeded.get_device(&DeviceId::new("d1")).await.unwrap().unwrap();
        device.token_revoked_at = Some(Utc::now());

        let store = Arc::new(InMemoryStore::new());
        store.create_device(&device).await.unwrap();

        let ing = ingestor(store);
        let err = ing.ingest(SECRET, payload_with_battery(50), None).await.unwrap_err();
        assert!(matches!(err, IngestError::DeviceDeleted { .. }));
    }

    #[tokio::test]
    async fn wrong_secret_is_opaque_unauthorized() {
        let store = seeded_store(false).await;
        let ing = ingestor(store);
        let err = ing
            .ingest("not-the-secret", payload_with_battery(50), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Unauthorized));
    }

    #[tokio::test]
    async fn service_down_with_auto_relaunch_queues_launch_event() {
        let store = seeded_store(true).await;
        let ing = ingestor(store.clone());

        let mut payload = payload_with_battery(90);
        payload.app_versions.insert(
            "com.example.app".into(),
            AppVersionInfo { installed: true, version_name: Some("2.0".into()) },
        );
        // 45 minutes since foreground, threshold is 10 → service down
        payload.monitored_foreground_recent_s = Some(45 * 60);

        ing.ingest(SECRET, payload, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let events = store
            .list_device_events(Some(&DeviceId::new("d1")), 10)
            .await
            .unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == "auto_relaunch_triggered"));

        let ls = store.get_last_status(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert_eq!(ls.service_up, Some(false));
    }

    #[tokio::test]
    async fn uninstalled_monitored_app_yields_unknown_service_state() {
        let store = seeded_store(true).await;
        let ing = ingestor(store.clone());

        let mut payload = payload_with_battery(90);
        payload.app_versions.insert(
            "com.example.app".into(),
            AppVersionInfo { installed: false, version_name: None },
        );
        payload.monitored_foreground_recent_s = Some(30);

        ing.ingest(SECRET, payload, None).await.unwrap();
        let ls = store.get_last_status(&DeviceId::new("d1")).await.unwrap().unwrap();
        assert_eq!(ls.service_up, None);

        // unknown never triggers a relaunch
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = store
            .list_device_events(Some(&DeviceId::new("d1")), 10)
            .await
            .unwrap();
        assert!(!events.iter().any(|e| e.event_type == "auto_relaunch_triggered"));
    }
}
