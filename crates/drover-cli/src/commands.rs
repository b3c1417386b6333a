use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use drover_api::{build_app, AppState};
use drover_config::{load_config, Config};
use drover_dispatch::{AckReceiver, CommandRequest, Dispatcher};
use drover_domain::{CommandAction, DeviceId};
use drover_ingest::{spawn_event_drain, IngestConfig, Ingestor, RegistrationGate, RelaunchSink};
use drover_jobs::{
    run_nightly, run_reconcile, spawn_alert_loop, spawn_nightly_loop, spawn_reconcile_loop,
    AlertEvaluator, AlertEvaluatorConfig, AlertNotifier, BlobStore, HttpBlobStore,
    MemoryBlobStore, NightlyOptions, ReconcileOptions, TracingNotifier, WebhookNotifier,
    CREATE_AHEAD_DAYS,
};
use drover_obs::Metrics;
use drover_push::PushClient;
use drover_store::{InMemoryStore, PostgresStore, Store};
use tracing::{info, warn};

/// Adapter feeding auto-relaunch events back into the dispatcher.
struct DispatcherRelaunch {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl RelaunchSink for DispatcherRelaunch {
    async fn relaunch(&self, device_id: &DeviceId, package: &str) {
        let req = CommandRequest {
            device_id: device_id.clone(),
            action: CommandAction::LaunchApp,
            params: BTreeMap::from([("package_name".to_string(), package.to_string())]),
            request_id: None,
        };
        if let Err(e) = self.dispatcher.dispatch(req).await {
            warn!(device_id = %device_id, package, error = %e, "auto-relaunch dispatch failed");
        }
    }
}

async fn connect_store(config: &Config, dev: bool) -> Result<Arc<dyn Store>> {
    match (&config.database_url, dev) {
        (Some(url), _) => {
            let store = PostgresStore::connect(url)
                .await
                .context("connecting to postgres")?;
            Ok(Arc::new(store))
        }
        (None, true) => {
            warn!("no DATABASE_URL — using in-memory store, all data is volatile");
            Ok(Arc::new(InMemoryStore::new()))
        }
        (None, false) => bail!("DATABASE_URL is required (or pass --dev for an in-memory store)"),
    }
}

async fn build_push_client(config: &Config, dev: bool) -> Result<Arc<PushClient>> {
    match &config.fcm.endpoint {
        Some(endpoint) => {
            info!(endpoint, "push provider endpoint override active");
            Ok(Arc::new(PushClient::with_static_token(
                &config.fcm.project_id,
                std::env::var("FCM_DEV_TOKEN").unwrap_or_else(|_| "dev-token".into()),
                endpoint,
            )))
        }
        None if dev => bail!("--dev requires fcm.endpoint to point at a provider stub"),
        None => {
            let client = PushClient::from_adc(&config.fcm.project_id)
                .await
                .context("initialising push provider credentials")?;
            Ok(Arc::new(client))
        }
    }
}

fn build_blob_store(config: &Config) -> Arc<dyn BlobStore> {
    match &config.archive.blob_base_url {
        Some(base) => Arc::new(HttpBlobStore::new(base.clone())),
        None => {
            warn!("no archive.blob_base_url — partition archives stay in process memory");
            Arc::new(MemoryBlobStore::new())
        }
    }
}

pub async fn serve(config_path: Option<PathBuf>, listen: Option<String>, dev: bool) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let metrics = Metrics::new()?;

    let store = connect_store(&config, dev).await?;
    let push = build_push_client(&config, dev).await?;
    let blob = build_blob_store(&config);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        push,
        metrics.clone(),
        config.hmac_secret.clone(),
        config.agent_package.clone(),
    ));

    let relaunch: Arc<dyn RelaunchSink> =
        Arc::new(DispatcherRelaunch { dispatcher: dispatcher.clone() });
    let events = spawn_event_drain(store.clone(), metrics.clone(), Some(relaunch));

    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        metrics.clone(),
        events,
        IngestConfig {
            bucket_seconds: config.heartbeat.bucket_seconds,
            interval_seconds: config.heartbeat.interval_seconds,
            unity_package: config.unity_package.clone(),
            default_monitoring: config.monitoring_defaults.clone(),
        },
    ));
    let gate = Arc::new(RegistrationGate::new(
        store.clone(),
        metrics.clone(),
        config.registration_concurrency,
        config.monitoring_defaults.clone(),
    ));
    let acks = Arc::new(AckReceiver::new(store.clone()));

    // Create-ahead at startup so the first heartbeat always has a partition.
    for offset in 0..=CREATE_AHEAD_DAYS {
        let day = chrono_today() + chrono::Duration::days(offset);
        if let Err(e) = store.ensure_partition(day).await {
            warn!(day = %day, error = %e, "startup partition create failed");
        }
    }

    let notifier: Arc<dyn AlertNotifier> = match &config.alerts.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(TracingNotifier),
    };
    let evaluator = Arc::new(AlertEvaluator::new(
        store.clone(),
        metrics.clone(),
        notifier,
        AlertEvaluatorConfig {
            heartbeat_interval_seconds: config.heartbeat.interval_seconds,
            low_battery_pct: config.alerts.low_battery_pct,
            unity_require_consecutive: config.alerts.unity_down_require_consecutive,
            cooldown_minutes: config.alerts.cooldown_minutes,
            default_monitoring: config.monitoring_defaults.clone(),
        },
    ));

    spawn_alert_loop(evaluator);
    spawn_reconcile_loop(store.clone(), metrics.clone(), 5000);
    spawn_nightly_loop(
        store.clone(),
        blob.clone(),
        metrics.clone(),
        config.archive.retention_days,
    );

    let state = AppState {
        store,
        ingestor,
        gate,
        dispatcher,
        acks,
        blob,
        metrics,
        admin_key: Arc::new(config.admin_key.clone()),
        monitoring_defaults: config.monitoring_defaults.clone(),
        retention_days: config.archive.retention_days,
    };
    let app = build_app(state);

    let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "drover api listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

pub async fn nightly(
    config_path: Option<PathBuf>,
    dry_run: bool,
    retention_days: Option<i64>,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let retention_days = match retention_days {
        None => config.archive.retention_days,
        Some(d) if (7..=365).contains(&d) => d,
        Some(d) => bail!("retention-days must be between 7 and 365, got {d}"),
    };

    let store = connect_store(&config, false).await?;
    let blob = build_blob_store(&config);
    let metrics = Metrics::new()?;

    let report = run_nightly(
        store,
        blob,
        metrics,
        NightlyOptions { dry_run, retention_days },
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn reconcile(
    config_path: Option<PathBuf>,
    dry_run: bool,
    max_rows: u32,
) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let store = connect_store(&config, false).await?;
    let metrics = Metrics::new()?;

    let report = run_reconcile(store, metrics, ReconcileOptions { dry_run, max_rows }).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn chrono_today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
