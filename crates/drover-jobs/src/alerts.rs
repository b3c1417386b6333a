use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use drover_domain::{
    AlertCondition, AlertStateKind, DeviceId, EffectiveMonitoring, MonitoringDefaults,
};
use drover_obs::Metrics;
use drover_store::{AlertStateRow, DeviceRow, HeartbeatRow, LastStatusRow, Store};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::JobError;

/// Only heartbeats from this window feed the sample-based conditions.
const HEARTBEAT_WINDOW_MIN: i64 = 30;

#[derive(Debug, Clone)]
pub struct AlertEvaluatorConfig {
    pub heartbeat_interval_seconds: i64,
    pub low_battery_pct: i32,
    pub unity_require_consecutive: bool,
    pub cooldown_minutes: i64,
    pub default_monitoring: MonitoringDefaults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTransition {
    Raised,
    Recovered,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub device_id: DeviceId,
    pub alias: String,
    pub condition: AlertCondition,
    pub transition: AlertTransition,
    pub value: Option<String>,
    pub context: serde_json::Value,
}

/// External notifier consuming raise/recover events.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent);
}

/// Default notifier: structured log lines only.
pub struct TracingNotifier;

#[async_trait]
impl AlertNotifier for TracingNotifier {
    async fn notify(&self, event: &AlertEvent) {
        info!(
            device_id = %event.device_id,
            alias = %event.alias,
            condition = %event.condition,
            transition = ?event.transition,
            value = ?event.value,
            "alert event"
        );
    }
}

/// Posts each event as JSON to a webhook. Delivery failures are logged and
/// never bubble into the evaluator.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, event: &AlertEvent) {
        let body = json!({
            "device_id": event.device_id,
            "alias": event.alias,
            "condition": event.condition,
            "transition": event.transition,
            "value": event.value,
            "context": event.context,
            "ts": Utc::now(),
        });
        if let Err(e) = self.client.post(&self.url).json(&body).send().await {
            warn!(url = %self.url, error = %e, "alert webhook delivery failed");
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub devices_checked: usize,
    pub raised: usize,
    pub recovered: usize,
}

/// Per-condition verdict for one device on one tick.
enum Verdict {
    /// Condition holds; raise unless already raised (or cooling down).
    Breach { value: String, context: serde_json::Value },
    /// Condition clear; recover if currently raised.
    Clear,
    /// Not enough data — neither raise nor recover.
    Unknown,
}

/// C6 — periodic batched alert evaluation with hysteresis.
///
/// A pure reader everywhere except `alert_states`. Ticks are serialized per
/// process; transitions are idempotent, so concurrent processes converge.
pub struct AlertEvaluator {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
    notifier: Arc<dyn AlertNotifier>,
    config: AlertEvaluatorConfig,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn Store>,
        metrics: Arc<Metrics>,
        notifier: Arc<dyn AlertNotifier>,
        config: AlertEvaluatorConfig,
    ) -> Self {
        Self { store, metrics, notifier, config }
    }

    pub async fn tick(&self) -> Result<TickReport, JobError> {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = TickReport::default();

        let devices = self.store.list_devices().await?;
        report.devices_checked = devices.len();
        if devices.is_empty() {
            return Ok(report);
        }
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();

        // Batch loads: one query per table, never per device.
        let mut states: HashMap<(DeviceId, AlertCondition), AlertStateRow> = self
            .store
            .list_alert_states(&ids)
            .await?
            .into_iter()
            .map(|s| ((s.device_id.clone(), s.condition), s))
            .collect();

        let mut recent: HashMap<DeviceId, Vec<HeartbeatRow>> = HashMap::new();
        for hb in self
            .store
            .latest_heartbeats(&ids, 2, Duration::minutes(HEARTBEAT_WINDOW_MIN))
            .await?
        {
            recent.entry(hb.device_id.clone()).or_default().push(hb);
        }
        for rows in recent.values_mut() {
            rows.sort_by(|a, b| b.ts.cmp(&a.ts));
        }

        let last_status: HashMap<DeviceId, LastStatusRow> = self
            .store
            .list_last_status(&ids)
            .await?
            .into_iter()
            .map(|ls| (ls.device_id.clone(), ls))
            .collect();

        let defaults = match self.store.get_monitoring_defaults().await {
            Ok(Some(d)) => d,
            Ok(None) => self.config.default_monitoring.clone(),
            Err(e) => {
                // Per-device evaluation still proceeds on the static defaults.
                warn!(error = %e, "monitoring defaults unavailable for alert tick");
                self.config.default_monitoring.clone()
            }
        };

        for device in &devices {
            let monitoring = EffectiveMonitoring::resolve(&device.monitoring, &defaults);
            let device_recent = recent.get(&device.id);
            let device_status = last_status.get(&device.id);

            for condition in AlertCondition::ALL {
                let verdict = match condition {
                    AlertCondition::Offline => self.eval_offline(device_status, now),
                    AlertCondition::LowBattery => self.eval_low_battery(device_recent),
                    AlertCondition::UnityDown => self.eval_unity_down(device_recent),
                    AlertCondition::ServiceDown => {
                        self.eval_service_down(&monitoring, device_status)
                    }
                };

                match self
                    .apply(device, condition, verdict, &mut states, now)
                    .await?
                {
                    Some(AlertTransition::Raised) => report.raised += 1,
                    Some(AlertTransition::Recovered) => report.recovered += 1,
                    None => {}
                }
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as f64;
        self.metrics.alert_evaluation_latency_ms.observe(elapsed_ms);
        self.metrics.alert_evaluations_total.inc();
        info!(
            devices_checked = report.devices_checked,
            raised = report.raised,
            recovered = report.recovered,
            elapsed_ms,
            "alert tick complete"
        );
        Ok(report)
    }

    // ── Condition evaluation ──────────────────────────────────────────────────

    /// Offline: gap since the last heartbeat exceeds three intervals.
    /// A device that has never heartbeat (no projection row) is not offline.
    fn eval_offline(&self, status: Option<&LastStatusRow>, now: DateTime<Utc>) -> Verdict {
        let Some(status) = status else {
            return Verdict::Unknown;
        };
        let gap_s = (now - status.last_ts).num_seconds();
        let threshold_s = self.config.heartbeat_interval_seconds * 3;
        if gap_s > threshold_s {
            let minutes_offline = gap_s / 60;
            Verdict::Breach {
                value: format!("{minutes_offline}m"),
                context: json!({
                    "last_seen": status.last_ts,
                    "minutes_offline": minutes_offline,
                    "missed_heartbeats": gap_s / self.config.heartbeat_interval_seconds,
                    "severity": "CRIT",
                }),
            }
        } else {
            Verdict::Clear
        }
    }

    /// Low battery: single-sample threshold on the freshest heartbeat.
    fn eval_low_battery(&self, recent: Option<&Vec<HeartbeatRow>>) -> Verdict {
        let Some(hb) = recent.and_then(|r| r.first()) else {
            return Verdict::Unknown;
        };
        let Some(pct) = hb.battery_pct else {
            return Verdict::Unknown;
        };
        if pct < self.config.low_battery_pct {
            Verdict::Breach {
                value: format!("{pct}%"),
                context: json!({
                    "battery_pct": pct,
                    "plugged": hb.plugged,
                    "network_type": hb.network_type,
                    "severity": "WARN",
                }),
            }
        } else {
            Verdict::Clear
        }
    }

    /// Unity down: single-sample, or two consecutive samples when configured.
    fn eval_unity_down(&self, recent: Option<&Vec<HeartbeatRow>>) -> Verdict {
        let samples = match recent {
            Some(r) if !r.is_empty() => r,
            _ => return Verdict::Unknown,
        };

        let down = if self.config.unity_require_consecutive {
            if samples.len() < 2 {
                return Verdict::Unknown;
            }
            samples[..2].iter().all(|hb| hb.unity_running == Some(false))
        } else {
            match samples[0].unity_running {
                None => return Verdict::Unknown,
                Some(running) => !running,
            }
        };

        if down {
            Verdict::Breach {
                value: "down".into(),
                context: json!({
                    "unity_running": false,
                    "unity_version": samples[0].unity_pkg_version,
                    "severity": "CRIT",
                    "requires_remediation": true,
                }),
            }
        } else {
            Verdict::Clear
        }
    }

    /// Service down: driven off the last-status projection. Unknown values
    /// (below zero or absent) neither raise nor recover.
    fn eval_service_down(
        &self,
        monitoring: &EffectiveMonitoring,
        status: Option<&LastStatusRow>,
    ) -> Verdict {
        if !monitoring.enabled || monitoring.package.is_empty() {
            return Verdict::Unknown;
        }
        let Some(status) = status else {
            return Verdict::Unknown;
        };
        match status.service_up {
            None => Verdict::Unknown,
            Some(false) => {
                let value = status
                    .monitored_foreground_recent_s
                    .filter(|s| *s >= 0)
                    .map(|s| format!("{s}s"))
                    .unwrap_or_else(|| "unknown".into());
                Verdict::Breach {
                    value,
                    context: json!({
                        "monitored_package": monitoring.package,
                        "monitored_app_name": monitoring.app_name,
                        "foreground_recent_s": status.monitored_foreground_recent_s,
                        "threshold_min": monitoring.threshold_min,
                        "severity": "CRIT",
                    }),
                }
            }
            Some(true) => Verdict::Clear,
        }
    }

    // ── Transition application ────────────────────────────────────────────────

    /// Idempotent state transition: at most one raise and one recovery per
    /// (device, condition) per tick, nothing written when nothing changed.
    async fn apply(
        &self,
        device: &DeviceRow,
        condition: AlertCondition,
        verdict: Verdict,
        states: &mut HashMap<(DeviceId, AlertCondition), AlertStateRow>,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTransition>, JobError> {
        let key = (device.id.clone(), condition);
        let current = states.get(&key);
        let currently_raised = current.map(|s| s.state) == Some(AlertStateKind::Raised);

        match verdict {
            Verdict::Breach { value, context } => {
                if currently_raised {
                    return Ok(None);
                }
                // Bounded flapping: a fresh raise inside the cooldown window
                // is suppressed without touching the row.
                if let Some(cooldown) = current.and_then(|s| s.cooldown_until) {
                    if cooldown > now {
                        return Ok(None);
                    }
                }

                let row = AlertStateRow {
                    device_id: device.id.clone(),
                    condition,
                    state: AlertStateKind::Raised,
                    last_raised_at: Some(now),
                    last_recovered_at: current.and_then(|s| s.last_recovered_at),
                    cooldown_until: Some(now + Duration::minutes(self.config.cooldown_minutes)),
                    consecutive_violations: current
                        .map(|s| s.consecutive_violations + 1)
                        .unwrap_or(1),
                    last_value: Some(value.clone()),
                    updated_at: now,
                };
                self.store.upsert_alert_state(&row).await?;
                states.insert(key, row);

                self.metrics
                    .alerts_raised_total
                    .with_label_values(&[condition.as_str()])
                    .inc();
                self.notifier
                    .notify(&AlertEvent {
                        device_id: device.id.clone(),
                        alias: device.alias.clone(),
                        condition,
                        transition: AlertTransition::Raised,
                        value: Some(value),
                        context,
                    })
                    .await;
                Ok(Some(AlertTransition::Raised))
            }

            Verdict::Clear => {
                if !currently_raised {
                    return Ok(None);
                }
                let Some(existing) = current else {
                    return Ok(None);
                };
                let row = AlertStateRow {
                    state: AlertStateKind::Ok,
                    last_recovered_at: Some(now),
                    last_value: None,
                    updated_at: now,
                    ..existing.clone()
                };
                self.store.upsert_alert_state(&row).await?;
                let self_healed = row.consecutive_violations > 0;
                states.insert(key, row);

                self.metrics
                    .alerts_recovered_total
                    .with_label_values(&[condition.as_str()])
                    .inc();
                self.notifier
                    .notify(&AlertEvent {
                        device_id: device.id.clone(),
                        alias: device.alias.clone(),
                        condition,
                        transition: AlertTransition::Recovered,
                        value: None,
                        context: json!({ "recovered": true, "self_healed": self_healed }),
                    })
                    .await;
                Ok(Some(AlertTransition::Recovered))
            }

            Verdict::Unknown => Ok(None),
        }
    }
}
