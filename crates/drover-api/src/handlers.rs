use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use drover_dispatch::{ActionResultAck, CommandRequest, ExecAck, ExecOutcome, ExecRequest, ExecTargets};
use drover_domain::{CommandAction, DeviceId, ExecId, ExecMode, MonitoringDefaults, TokenStatus};
use drover_ingest::{authenticate_device, generate_secret, hash_secret, token_fingerprint};
use drover_jobs::{run_nightly, run_reconcile, NightlyOptions, ReconcileOptions};
use drover_store::{BloatwareRow, EnrollmentTokenRow, Store};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{device_secret, ENROLLMENT_TOKEN_HEADER};
use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list_partitions().await?;
    Ok(StatusCode::OK)
}

// ── Device protocol ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub alias: Option<String>,
    pub hardware_id: Option<String>,
}

/// `POST /v1/register` — admin key or scoped enrollment token.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    let alias = body
        .alias
        .as_deref()
        .ok_or_else(|| ApiError::unprocessable("alias is required"))?;

    let enrollment = if crate::auth::admin_key_matches(&headers, &state.admin_key) {
        None
    } else {
        let token = headers
            .get(ENROLLMENT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(ApiError::unauthorized)?;
        Some(token)
    };

    let registration = state
        .gate
        .register(alias, body.hardware_id.as_deref(), enrollment)
        .await?;

    Ok(Json(json!({
        "device_id": registration.device_id,
        "device_token": registration.device_token,
    })))
}

/// `POST /v1/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<drover_domain::HeartbeatPayload>,
) -> Result<Json<Value>, ApiError> {
    let secret = device_secret(&headers)?;
    let outcome = state.ingestor.ingest(secret, payload, None).await?;
    Ok(Json(json!({ "ok": true, "created": outcome.created })))
}

/// `POST /v1/action-result`
pub async fn action_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ack): Json<ActionResultAck>,
) -> Result<Json<Value>, ApiError> {
    let secret = device_secret(&headers)?;
    let device = authenticate_device(state.store.as_ref(), secret).await?;
    let response = state.acks.record_action_result(&device.id, ack).await?;
    Ok(Json(json!({ "ok": true, "idempotent": response.idempotent })))
}

/// `POST /v1/remote-exec/ack` — stricter correlation-bound form.
pub async fn remote_exec_ack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(ack): Json<ExecAck>,
) -> Result<Json<Value>, ApiError> {
    let secret = device_secret(&headers)?;
    let device = authenticate_device(state.store.as_ref(), secret).await?;
    let response = state.acks.record_exec_ack(&device.id, ack).await?;
    Ok(Json(json!({ "ok": true, "idempotent": response.idempotent })))
}

// ── Admin: commands ───────────────────────────────────────────────────────────

/// `POST /v1/devices/:id/commands/:action`
pub async fn device_command(
    State(state): State<AppState>,
    Path((device_id, action)): Path<(String, String)>,
    body: Option<Json<BTreeMap<String, String>>>,
) -> Result<Json<Value>, ApiError> {
    let action = CommandAction::from_route(&action)
        .ok_or_else(|| ApiError::unprocessable(format!("unknown command action '{action}'")))?;
    let params = body.map(|Json(b)| b).unwrap_or_default();

    match action {
        CommandAction::LaunchApp | CommandAction::RestartApp => {
            if !params.contains_key("package_name") {
                return Err(ApiError::unprocessable("package_name is required"));
            }
        }
        CommandAction::WifiConnect => {
            if !params.contains_key("ssid") {
                return Err(ApiError::unprocessable("ssid is required"));
            }
        }
        _ => {}
    }

    let receipt = state
        .dispatcher
        .dispatch(CommandRequest {
            device_id: DeviceId::new(device_id),
            action,
            params,
            request_id: None,
        })
        .await?;

    Ok(Json(json!({
        "request_id": receipt.request_id,
        "fcm_status": receipt.fcm_status,
        "http_code": receipt.http_code,
        "idempotent": receipt.idempotent,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RemoteExecBody {
    pub mode: String,
    #[serde(default)]
    pub targets: TargetsBody,
    pub payload: Option<BTreeMap<String, String>>,
    pub command: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetsBody {
    #[serde(default)]
    pub all: bool,
    pub aliases: Option<Vec<String>>,
    pub filter: Option<FilterBody>,
}

#[derive(Debug, Deserialize)]
pub struct FilterBody {
    pub online: Option<bool>,
}

/// `POST /v1/remote-exec`
pub async fn remote_exec(
    State(state): State<AppState>,
    Json(body): Json<RemoteExecBody>,
) -> Result<Json<Value>, ApiError> {
    let mode = match body.mode.as_str() {
        "fcm" => ExecMode::Fcm,
        "shell" => ExecMode::Shell,
        other => {
            return Err(ApiError::unprocessable(format!(
                "mode must be 'fcm' or 'shell', got '{other}'"
            )))
        }
    };

    let targets = if body.targets.all {
        ExecTargets::All
    } else if let Some(aliases) = body.targets.aliases {
        ExecTargets::Aliases(aliases)
    } else if let Some(filter) = body.targets.filter {
        ExecTargets::Filter { online: filter.online }
    } else {
        return Err(ApiError::unprocessable(
            "must specify targets: all, aliases, or filter",
        ));
    };

    let outcome = state
        .dispatcher
        .run_exec(ExecRequest {
            mode,
            targets,
            payload: body.payload,
            command: body.command,
            dry_run: body.dry_run,
            created_by: "admin".into(),
        })
        .await?;

    match outcome {
        ExecOutcome::DryRun { estimated_count, sample } => Ok(Json(json!({
            "dry_run": true,
            "estimated_count": estimated_count,
            "sample": sample
                .iter()
                .map(|(id, alias)| json!({ "id": id, "alias": alias }))
                .collect::<Vec<_>>(),
        }))),
        ExecOutcome::Started(summary) => Ok(Json(json!({
            "ok": true,
            "exec_id": summary.exec_id,
            "total_targets": summary.total_targets,
            "sent_count": summary.sent_count,
            "error_count": summary.error_count,
        }))),
    }
}

/// `GET /v1/remote-exec/:id` — status plus per-device results.
pub async fn get_remote_exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let exec_id = ExecId::new(&id);
    let batch = state
        .store
        .get_exec_batch(&exec_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution '{id}' not found")))?;
    let dispatches = state.store.list_dispatches_for_exec(&exec_id).await?;

    let results: Vec<Value> = dispatches
        .iter()
        .map(|d| {
            json!({
                "device_id": d.device_id,
                "correlation_id": d.request_id,
                "fcm_status": d.fcm_status,
                "result": d.result,
                "result_message": d.result_message,
                "sent_at": d.sent_at,
                "completed_at": d.completed_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "exec_id": batch.exec_id,
        "mode": batch.mode,
        "status": batch.status,
        "created_at": batch.created_at,
        "created_by": batch.created_by,
        "completed_at": batch.completed_at,
        "stats": {
            "total_targets": batch.total_targets,
            "sent_count": batch.sent_count,
            "acked_count": batch.acked_count,
            "error_count": batch.error_count,
        },
        "results": results,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

pub async fn list_remote_execs(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(10).min(100);
    let batches = state.store.list_exec_batches(limit).await?;
    let count = batches.len();
    Ok(Json(json!({ "executions": batches, "count": count })))
}

// ── Admin: enrollment tokens ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentBody {
    pub alias: String,
    pub expires_in_hours: Option<i64>,
    pub uses_allowed: Option<i32>,
}

/// `POST /admin/enrollment-tokens` — the plaintext token is returned once.
pub async fn create_enrollment_token(
    State(state): State<AppState>,
    Json(body): Json<CreateEnrollmentBody>,
) -> Result<Json<Value>, ApiError> {
    let expires_in = body.expires_in_hours.unwrap_or(24);
    if expires_in <= 0 {
        return Err(ApiError::unprocessable("expires_in_hours must be positive"));
    }
    let uses_allowed = body.uses_allowed.unwrap_or(1);
    if uses_allowed <= 0 {
        return Err(ApiError::unprocessable("uses_allowed must be positive"));
    }

    let secret = generate_secret();
    let now = Utc::now();
    let row = EnrollmentTokenRow {
        token_id: token_fingerprint(&secret),
        token_hash: hash_secret(&secret),
        alias: body.alias,
        issued_at: now,
        expires_at: now + Duration::hours(expires_in),
        uses_allowed,
        uses_consumed: 0,
        status: TokenStatus::Active,
        device_id: None,
        used_at: None,
    };
    state.store.insert_enrollment_token(&row).await?;

    Ok(Json(json!({
        "token_id": row.token_id,
        "enrollment_token": secret,
        "alias": row.alias,
        "expires_at": row.expires_at,
        "uses_allowed": row.uses_allowed,
    })))
}

pub async fn list_enrollment_tokens(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let tokens = state.store.list_enrollment_tokens().await?;
    let rows: Vec<Value> = tokens
        .iter()
        .map(|t| {
            json!({
                "token_id": t.token_id,
                "alias": t.alias,
                "issued_at": t.issued_at,
                "expires_at": t.expires_at,
                "uses_allowed": t.uses_allowed,
                "uses_consumed": t.uses_consumed,
                "status": t.status,
                "device_id": t.device_id,
            })
        })
        .collect();
    Ok(Json(json!({ "tokens": rows })))
}

pub async fn revoke_enrollment_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.revoke_enrollment_token(&token_id).await?;
    Ok(Json(json!({ "ok": true, "token_id": token_id })))
}

// ── Admin: monitoring settings ────────────────────────────────────────────────

pub async fn get_monitoring_defaults(
    State(state): State<AppState>,
) -> Result<Json<MonitoringDefaults>, ApiError> {
    let defaults = state
        .store
        .get_monitoring_defaults()
        .await?
        .unwrap_or_else(|| state.monitoring_defaults.clone());
    Ok(Json(defaults))
}

#[derive(Debug, Deserialize)]
pub struct PatchDefaultsBody {
    pub enabled: Option<bool>,
    pub package: Option<String>,
    pub app_name: Option<String>,
    pub threshold_min: Option<i64>,
}

pub async fn patch_monitoring_defaults(
    State(state): State<AppState>,
    Json(body): Json<PatchDefaultsBody>,
) -> Result<Json<MonitoringDefaults>, ApiError> {
    let mut defaults = state
        .store
        .get_monitoring_defaults()
        .await?
        .unwrap_or_else(|| state.monitoring_defaults.clone());

    if let Some(enabled) = body.enabled {
        defaults.enabled = enabled;
    }
    if let Some(package) = body.package {
        defaults.package = package;
    }
    if let Some(app_name) = body.app_name {
        defaults.app_name = app_name;
    }
    if let Some(threshold) = body.threshold_min {
        if threshold <= 0 {
            return Err(ApiError::unprocessable("threshold_min must be positive"));
        }
        defaults.threshold_min = threshold;
    }

    state.store.set_monitoring_defaults(&defaults).await?;
    Ok(Json(defaults))
}

pub async fn get_device_monitoring(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(&id);
    let device = state
        .store
        .get_device(&device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device '{id}' not found")))?;
    Ok(Json(json!({
        "device_id": device.id,
        "monitoring": device.monitoring,
        "auto_relaunch_enabled": device.auto_relaunch_enabled,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PatchDeviceMonitoringBody {
    pub monitor_enabled: Option<bool>,
    pub monitored_package: Option<String>,
    pub monitored_app_name: Option<String>,
    pub monitored_threshold_min: Option<i64>,
    pub monitoring_use_defaults: Option<bool>,
    pub auto_relaunch_enabled: Option<bool>,
}

pub async fn patch_device_monitoring(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PatchDeviceMonitoringBody>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::new(&id);
    let device = state
        .store
        .get_device(&device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device '{id}' not found")))?;

    let mut monitoring = device.monitoring.clone();
    if let Some(v) = body.monitor_enabled {
        monitoring.monitor_enabled = v;
    }
    if let Some(v) = body.monitored_package {
        monitoring.monitored_package = v;
    }
    if let Some(v) = body.monitored_app_name {
        monitoring.monitored_app_name = v;
    }
    if let Some(v) = body.monitored_threshold_min {
        if v <= 0 {
            return Err(ApiError::unprocessable("monitored_threshold_min must be positive"));
        }
        monitoring.monitored_threshold_min = v;
    }
    if let Some(v) = body.monitoring_use_defaults {
        monitoring.monitoring_use_defaults = v;
    }

    state
        .store
        .update_device_monitoring(&device_id, &monitoring, body.auto_relaunch_enabled)
        .await?;

    Ok(Json(json!({ "ok": true, "device_id": device_id, "monitoring": monitoring })))
}

// ── Admin: bloatware registry ─────────────────────────────────────────────────

pub async fn list_bloatware(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.store.list_bloatware().await?;
    Ok(Json(json!({ "packages": rows })))
}

#[derive(Debug, Deserialize)]
pub struct AddBloatwareBody {
    pub package_name: String,
    pub app_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn add_bloatware(
    State(state): State<AppState>,
    Json(body): Json<AddBloatwareBody>,
) -> Result<Json<Value>, ApiError> {
    if body.package_name.is_empty() || !body.package_name.contains('.') {
        return Err(ApiError::unprocessable("package_name must be a dotted package id"));
    }
    let row = BloatwareRow {
        package_name: body.package_name,
        app_name: body.app_name,
        enabled: body.enabled,
        added_at: Utc::now(),
    };
    state.store.upsert_bloatware(&row).await?;
    Ok(Json(json!({ "ok": true, "package": row })))
}

pub async fn delete_bloatware(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.remove_bloatware(&package_name).await?;
    Ok(Json(json!({ "ok": true, "package_name": package_name })))
}

// ── Admin: fleet views ────────────────────────────────────────────────────────

pub async fn list_devices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let devices = state.store.list_devices().await?;
    let ids: Vec<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();
    let statuses: std::collections::HashMap<DeviceId, _> = state
        .store
        .list_last_status(&ids)
        .await?
        .into_iter()
        .map(|ls| (ls.device_id.clone(), ls))
        .collect();

    let rows: Vec<Value> = devices
        .iter()
        .map(|d| {
            json!({
                "device_id": d.id,
                "alias": d.alias,
                "last_seen": d.last_seen,
                "agent_version": d.agent_version,
                "auto_relaunch_enabled": d.auto_relaunch_enabled,
                "last_status": statuses.get(&d.id),
            })
        })
        .collect();
    Ok(Json(json!({ "devices": rows, "count": rows.len() })))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub device_id: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let device_id = q.device_id.map(DeviceId::new);
    let events = state
        .store
        .list_device_events(device_id.as_ref(), q.limit.unwrap_or(100))
        .await?;
    Ok(Json(json!({ "events": events })))
}

// ── Admin: ops triggers ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NightlyQuery {
    #[serde(default)]
    pub dry_run: bool,
    pub retention_days: Option<i64>,
}

/// `POST /ops/nightly` — manual trigger for external schedulers.
pub async fn ops_nightly(
    State(state): State<AppState>,
    Query(q): Query<NightlyQuery>,
) -> Result<Json<Value>, ApiError> {
    let retention_days = match q.retention_days {
        None => state.retention_days,
        Some(d) if (7..=365).contains(&d) => d,
        Some(d) => {
            return Err(ApiError::unprocessable(format!(
                "retention_days must be between 7 and 365, got {d}"
            )))
        }
    };

    let report = run_nightly(
        state.store.clone(),
        state.blob.clone(),
        state.metrics.clone(),
        NightlyOptions { dry_run: q.dry_run, retention_days },
    )
    .await?;
    Ok(Json(json!({ "ok": true, "report": report })))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    #[serde(default)]
    pub dry_run: bool,
    pub max_rows: Option<u32>,
}

/// `POST /ops/reconcile`
pub async fn ops_reconcile(
    State(state): State<AppState>,
    Query(q): Query<ReconcileQuery>,
) -> Result<Json<Value>, ApiError> {
    let report = run_reconcile(
        state.store.clone(),
        state.metrics.clone(),
        ReconcileOptions {
            dry_run: q.dry_run,
            max_rows: q.max_rows.unwrap_or(5000),
        },
    )
    .await?;
    Ok(Json(json!({ "ok": true, "report": report })))
}

// ── Admin: metrics exposition ─────────────────────────────────────────────────

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
