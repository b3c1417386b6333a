use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use drover_domain::{
    bulk_correlation_id, CommandAction, DeviceId, ExecId, ExecMode, FcmStatus,
};
use drover_obs::Metrics;
use drover_push::{sign_command, PushClient};
use drover_store::{
    DeviceRow, DispatchRow, DispatchUpdate, ExecBatchRow, NewDispatch, Store,
};
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::allowlist::validate_shell_command;
use crate::error::DispatchError;

/// Concurrent provider calls during a bulk fan-out.
const BULK_FANOUT: usize = 8;
/// Minimum spacing between pings to the same device.
const PING_COOLDOWN_S: i64 = 15;

// ── Requests / receipts ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub device_id: DeviceId,
    pub action: CommandAction,
    /// Action-specific fields (`package_name`, `ssid`, …); every entry is
    /// included in the signed string and the push data payload.
    pub params: BTreeMap<String, String>,
    /// Present on idempotent replays.
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub request_id: String,
    pub fcm_status: FcmStatus,
    pub http_code: Option<i32>,
    pub idempotent: bool,
}

#[derive(Debug, Clone)]
pub enum ExecTargets {
    All,
    Aliases(Vec<String>),
    Filter { online: Option<bool> },
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub mode: ExecMode,
    pub targets: ExecTargets,
    /// FCM mode: free-form data fields forwarded to the device.
    pub payload: Option<BTreeMap<String, String>>,
    /// Shell mode: the command gated through the allow-list.
    pub command: Option<String>,
    pub dry_run: bool,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub enum ExecOutcome {
    DryRun {
        estimated_count: usize,
        sample: Vec<(DeviceId, String)>,
    },
    Started(ExecSummary),
}

#[derive(Debug, Clone)]
pub struct ExecSummary {
    pub exec_id: ExecId,
    pub total_targets: usize,
    pub sent_count: usize,
    pub error_count: usize,
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// C4 — at-most-once command delivery with a durable dispatch ledger.
///
/// The ledger row is persisted before the provider call; a provider ack
/// means the push was accepted upstream, never that the device executed.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    push: Arc<PushClient>,
    metrics: Arc<Metrics>,
    hmac_secret: String,
    agent_package: String,
    last_ping: Mutex<HashMap<DeviceId, DateTime<Utc>>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        push: Arc<PushClient>,
        metrics: Arc<Metrics>,
        hmac_secret: impl Into<String>,
        agent_package: impl Into<String>,
    ) -> Self {
        Self {
            store,
            push,
            metrics,
            hmac_secret: hmac_secret.into(),
            agent_package: agent_package.into(),
            last_ping: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch a single command to a single device.
    pub async fn dispatch(&self, req: CommandRequest) -> Result<DispatchReceipt, DispatchError> {
        let device = self
            .store
            .get_device(&req.device_id)
            .await?
            .ok_or_else(|| DispatchError::DeviceNotFound(req.device_id.to_string()))?;
        let fcm_token = device.fcm_token.clone().ok_or_else(|| {
            DispatchError::Validation("device has no push token registered".into())
        })?;

        if req.action == CommandAction::Ping {
            self.check_ping_cooldown(&device.id).await?;
        }

        let request_id = req
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let payload_hash = hash_params(&req.params);
        let now = Utc::now();

        // Ledger row first — the provider is only ever called for a
        // persisted dispatch.
        let (existing, created) = self
            .store
            .insert_dispatch(NewDispatch {
                request_id: request_id.clone(),
                device_id: device.id.clone(),
                action: req.action,
                exec_id: None,
                payload_hash: Some(payload_hash.clone()),
                sent_at: now,
            })
            .await?;

        if !created {
            return self.replay(existing, &device, req.action, &payload_hash);
        }

        let outcome = self
            .push_signed(&request_id, &device.id, &fcm_token, req.action, &req.params, now)
            .await;

        match outcome {
            Ok((http_code, message_id)) => {
                self.metrics
                    .dispatches_total
                    .with_label_values(&[req.action.wire_name(), "sent"])
                    .inc();
                info!(
                    request_id,
                    device_id = %device.id,
                    action = %req.action,
                    http_code,
                    "dispatch sent"
                );
                Ok(DispatchReceipt {
                    request_id,
                    fcm_status: FcmStatus::Sent,
                    http_code: Some(http_code),
                    idempotent: false,
                })
            }
            Err(e) => {
                self.metrics
                    .dispatches_total
                    .with_label_values(&[req.action.wire_name(), "failed"])
                    .inc();
                warn!(
                    request_id,
                    device_id = %device.id,
                    action = %req.action,
                    error = %e,
                    "dispatch failed"
                );
                Err(e)
            }
        }
    }

    fn replay(
        &self,
        existing: DispatchRow,
        device: &DeviceRow,
        action: CommandAction,
        payload_hash: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        // Matching fields: answer from the ledger. Anything else is a
        // request_id collision the caller must resolve.
        if existing.device_id != device.id
            || existing.action != action
            || existing.payload_hash.as_deref() != Some(payload_hash)
        {
            return Err(DispatchError::Conflict(existing.request_id));
        }
        self.metrics.dispatch_idempotency_hits_total.inc();
        info!(request_id = %existing.request_id, "dispatch idempotency hit");
        Ok(DispatchReceipt {
            request_id: existing.request_id.clone(),
            fcm_status: existing.fcm_status,
            http_code: existing.http_code,
            idempotent: true,
        })
    }

    /// Bulk remote execution (fcm or shell mode) with dry-run support.
    pub async fn run_exec(&self, req: ExecRequest) -> Result<ExecOutcome, DispatchError> {
        let action = req.mode.action();
        let data_fields = self.exec_data_fields(&req).await?;

        let targets = self.resolve_targets(&req.targets).await?;
        if targets.is_empty() {
            return Err(DispatchError::Validation(
                "no devices match the specified criteria or none have push tokens".into(),
            ));
        }

        if req.dry_run {
            return Ok(ExecOutcome::DryRun {
                estimated_count: targets.len(),
                sample: targets
                    .iter()
                    .take(20)
                    .map(|d| (d.id.clone(), d.alias.clone()))
                    .collect(),
            });
        }

        let exec_id = ExecId::generate();
        let payload_hash = hash_params(&data_fields);
        self.store
            .insert_exec_batch(&ExecBatchRow {
                exec_id: exec_id.clone(),
                mode: req.mode,
                payload_hash: payload_hash.clone(),
                created_by: req.created_by.clone(),
                status: "processing".into(),
                total_targets: targets.len() as i64,
                sent_count: 0,
                acked_count: 0,
                error_count: 0,
                created_at: Utc::now(),
                completed_at: None,
            })
            .await?;

        info!(
            exec_id = %exec_id,
            mode = %req.mode,
            targets = targets.len(),
            "remote exec started"
        );

        let tasks: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + '_>>> =
            targets
                .iter()
                .map(|device| {
                    let exec_id = exec_id.clone();
                    let data_fields = data_fields.clone();
                    let payload_hash = payload_hash.clone();
                    Box::pin(async move {
                        self.exec_one(&exec_id, device, action, data_fields, payload_hash)
                            .await
                    }) as std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + '_>>
                })
                .collect();

        let results: Vec<bool> = stream::iter(tasks).buffer_unordered(BULK_FANOUT).collect().await;

        let sent_count = results.iter().filter(|ok| **ok).count();
        let error_count = results.len() - sent_count;

        self.store
            .finish_exec_batch(&exec_id, "completed", Utc::now())
            .await?;

        info!(
            exec_id = %exec_id,
            sent = sent_count,
            errors = error_count,
            "remote exec complete"
        );

        Ok(ExecOutcome::Started(ExecSummary {
            exec_id,
            total_targets: targets.len(),
            sent_count,
            error_count,
        }))
    }

    /// One device's slice of a bulk exec. Returns whether the push was
    /// accepted; every outcome is recorded in the ledger and counters.
    async fn exec_one(
        &self,
        exec_id: &ExecId,
        device: &DeviceRow,
        action: CommandAction,
        mut data_fields: BTreeMap<String, String>,
        payload_hash: String,
    ) -> bool {
        let correlation_id = bulk_correlation_id(exec_id, &device.id);
        let now = Utc::now();

        let inserted = self
            .store
            .insert_dispatch(NewDispatch {
                request_id: correlation_id.clone(),
                device_id: device.id.clone(),
                action,
                exec_id: Some(exec_id.clone()),
                payload_hash: Some(payload_hash),
                sent_at: now,
            })
            .await;
        match inserted {
            Ok((_, true)) => {}
            // Already dispatched in a previous (resumed) run — skip resend.
            Ok((_, false)) => return true,
            Err(e) => {
                warn!(correlation_id, error = %e, "exec ledger write failed");
                let _ = self.store.bump_exec_counters(exec_id, 0, 0, 1).await;
                return false;
            }
        }

        data_fields.insert("exec_id".into(), exec_id.to_string());
        data_fields.insert("correlation_id".into(), correlation_id.clone());

        let fcm_token = match &device.fcm_token {
            Some(t) => t.clone(),
            None => {
                let _ = self.store.bump_exec_counters(exec_id, 0, 0, 1).await;
                return false;
            }
        };

        let pushed = self
            .push_signed(&correlation_id, &device.id, &fcm_token, action, &data_fields, now)
            .await;

        match pushed {
            Ok(_) => {
                let _ = self.store.bump_exec_counters(exec_id, 1, 0, 0).await;
                true
            }
            Err(e) => {
                warn!(correlation_id, device_id = %device.id, error = %e, "exec push failed");
                let _ = self.store.bump_exec_counters(exec_id, 0, 0, 1).await;
                false
            }
        }
    }

    /// Sign, send, and record the outcome on the ledger row.
    async fn push_signed(
        &self,
        request_id: &str,
        device_id: &DeviceId,
        fcm_token: &str,
        action: CommandAction,
        params: &BTreeMap<String, String>,
        sent_at: DateTime<Utc>,
    ) -> Result<(i32, Option<String>), DispatchError> {
        let ts = sent_at.to_rfc3339();
        let signed_params: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let hmac = sign_command(
            &self.hmac_secret,
            request_id,
            device_id.as_str(),
            action.wire_name(),
            &ts,
            &signed_params,
        );

        let mut data = params.clone();
        data.insert("action".into(), action.wire_name().to_string());
        data.insert("request_id".into(), request_id.to_string());
        data.insert("device_id".into(), device_id.to_string());
        data.insert("ts".into(), ts);
        data.insert("hmac".into(), hmac);
        if action == CommandAction::Ping {
            data.insert("expect_reply_within".into(), "60".into());
        }

        match self.push.send(fcm_token, &data).await {
            Ok(ack) => {
                self.metrics.fcm_latency_ms.observe(ack.latency_ms as f64);
                self.store
                    .update_dispatch_outcome(
                        request_id,
                        DispatchUpdate::Sent {
                            http_code: ack.http_code as i32,
                            fcm_message_id: ack.message_id.clone(),
                            latency_ms: ack.latency_ms,
                        },
                    )
                    .await?;
                Ok((ack.http_code as i32, ack.message_id))
            }
            Err(e) => {
                let http_code = match &e {
                    drover_push::PushError::Provider { http_code, .. } => {
                        Some(*http_code as i32)
                    }
                    _ => None,
                };
                self.store
                    .update_dispatch_outcome(
                        request_id,
                        DispatchUpdate::Failed {
                            http_code,
                            error_msg: e.to_string(),
                            latency_ms: None,
                        },
                    )
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn exec_data_fields(
        &self,
        req: &ExecRequest,
    ) -> Result<BTreeMap<String, String>, DispatchError> {
        match req.mode {
            ExecMode::Fcm => {
                let payload = req.payload.clone().ok_or_else(|| {
                    DispatchError::Validation("fcm mode requires a payload".into())
                })?;
                let mut fields = payload;
                fields.insert("mode".into(), "fcm".into());
                Ok(fields)
            }
            ExecMode::Shell => {
                let command = req.command.clone().ok_or_else(|| {
                    DispatchError::Validation("shell mode requires a command".into())
                })?;
                let enabled: HashSet<String> = self
                    .store
                    .list_bloatware()
                    .await?
                    .into_iter()
                    .filter(|b| b.enabled)
                    .map(|b| b.package_name)
                    .collect();
                validate_shell_command(&command, &enabled, &self.agent_package)
                    .map_err(DispatchError::AllowList)?;
                Ok(BTreeMap::from([
                    ("mode".to_string(), "shell".to_string()),
                    ("command".to_string(), command),
                ]))
            }
        }
    }

    async fn resolve_targets(
        &self,
        targets: &ExecTargets,
    ) -> Result<Vec<DeviceRow>, DispatchError> {
        let all = self.store.list_devices().await?;
        let filtered: Vec<DeviceRow> = match targets {
            ExecTargets::All => all,
            ExecTargets::Aliases(aliases) => {
                if aliases.is_empty() {
                    return Err(DispatchError::Validation("aliases list is empty".into()));
                }
                let wanted: HashSet<&str> = aliases.iter().map(String::as_str).collect();
                all.into_iter()
                    .filter(|d| wanted.contains(d.alias.as_str()))
                    .collect()
            }
            ExecTargets::Filter { online } => {
                let cutoff = Utc::now() - Duration::minutes(10);
                all.into_iter()
                    .filter(|d| match online {
                        Some(true) => d.last_seen >= cutoff,
                        Some(false) => d.last_seen < cutoff,
                        None => true,
                    })
                    .collect()
            }
        };
        Ok(filtered.into_iter().filter(|d| d.fcm_token.is_some()).collect())
    }

    async fn check_ping_cooldown(&self, device_id: &DeviceId) -> Result<(), DispatchError> {
        let mut guard = self.last_ping.lock().await;
        let now = Utc::now();
        if let Some(last) = guard.get(device_id) {
            let elapsed = (now - *last).num_seconds();
            if elapsed < PING_COOLDOWN_S {
                return Err(DispatchError::RateLimited {
                    retry_after_s: PING_COOLDOWN_S - elapsed,
                });
            }
        }
        guard.insert(device_id.clone(), now);
        Ok(())
    }
}

/// Deterministic hash of the dispatch parameters (BTreeMap keeps key order
/// canonical) for idempotency comparison and ledger audit.
fn hash_params(params: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(params).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
