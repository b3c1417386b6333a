use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{request_id, require_admin_key};
use crate::handlers;
use crate::state::AppState;

/// Bodies above this are rejected with 413.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn build_app(state: AppState) -> Router {
    // Device-facing surface; bearer auth happens inside each handler
    // because the full secret is needed for verification.
    let device_routes = Router::new()
        .route("/v1/register", post(handlers::register))
        .route("/v1/heartbeat", post(handlers::heartbeat))
        .route("/v1/action-result", post(handlers::action_result))
        .route("/v1/remote-exec/ack", post(handlers::remote_exec_ack));

    // Admin surface behind the constant-time key check.
    let admin_routes = Router::new()
        .route(
            "/v1/devices/:id/commands/:action",
            post(handlers::device_command),
        )
        .route(
            "/v1/remote-exec",
            post(handlers::remote_exec).get(handlers::list_remote_execs),
        )
        .route("/v1/remote-exec/:id", get(handlers::get_remote_exec))
        .route("/v1/devices", get(handlers::list_devices))
        .route(
            "/admin/enrollment-tokens",
            post(handlers::create_enrollment_token).get(handlers::list_enrollment_tokens),
        )
        .route(
            "/admin/enrollment-tokens/:token_id/revoke",
            post(handlers::revoke_enrollment_token),
        )
        .route(
            "/admin/settings/monitoring-defaults",
            get(handlers::get_monitoring_defaults).patch(handlers::patch_monitoring_defaults),
        )
        .route(
            "/admin/devices/:id/monitoring",
            get(handlers::get_device_monitoring).patch(handlers::patch_device_monitoring),
        )
        .route(
            "/admin/bloatware-list",
            get(handlers::list_bloatware).post(handlers::add_bloatware),
        )
        .route(
            "/admin/bloatware-list/:package",
            delete(handlers::delete_bloatware),
        )
        .route("/ops/nightly", post(handlers::ops_nightly))
        .route("/ops/reconcile", post(handlers::ops_reconcile))
        .route("/ops/events", get(handlers::list_events))
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .merge(device_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(request_id))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use drover_dispatch::{AckReceiver, Dispatcher};
    use drover_domain::MonitoringDefaults;
    use drover_ingest::{spawn_event_drain, IngestConfig, Ingestor, RegistrationGate};
    use drover_jobs::MemoryBlobStore;
    use drover_obs::Metrics;
    use drover_push::PushClient;
    use drover_store::{InMemoryStore, Store};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ADMIN_KEY: &str = "test-admin-key";

    fn defaults() -> MonitoringDefaults {
        MonitoringDefaults {
            enabled: true,
            package: "com.example.app".into(),
            app_name: "Example".into(),
            threshold_min: 10,
        }
    }

    async fn provider_stub() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/proj-1/messages:send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/proj-1/messages/m-1"
            })))
            .mount(&server)
            .await;
        server
    }

    async fn test_app(provider: &MockServer) -> (Router, Arc<InMemoryStore>) {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let metrics = Metrics::new().unwrap();
        let push = Arc::new(PushClient::with_static_token(
            "proj-1",
            "fake-token",
            provider.uri(),
        ));

        let events = spawn_event_drain(store.clone(), metrics.clone(), None);
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            metrics.clone(),
            events,
            IngestConfig {
                bucket_seconds: 10,
                interval_seconds: 600,
                unity_package: "com.unitynetwork.unityapp".into(),
                default_monitoring: defaults(),
            },
        ));
        let gate = Arc::new(RegistrationGate::new(
            store.clone(),
            metrics.clone(),
            15,
            defaults(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            push,
            metrics.clone(),
            "hmac-secret",
            "com.drover.agent",
        ));
        let acks = Arc::new(AckReceiver::new(store.clone()));

        let state = AppState {
            store: store.clone(),
            ingestor,
            gate,
            dispatcher,
            acks,
            blob: Arc::new(MemoryBlobStore::new()),
            metrics,
            admin_key: Arc::new(ADMIN_KEY.to_string()),
            monitoring_defaults: defaults(),
            retention_days: 30,
        };
        (build_app(state), store)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_admin(mut req: Request<Body>) -> Request<Body> {
        req.headers_mut()
            .insert("x-admin-key", ADMIN_KEY.parse().unwrap());
        req
    }

    fn with_device(mut req: Request<Body>, token: &str) -> Request<Body> {
        req.headers_mut()
            .insert("x-device-token", token.parse().unwrap());
        req
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_device(app: &Router, alias: &str) -> (String, String) {
        let resp = app
            .clone()
            .oneshot(with_admin(post_json("/v1/register", json!({ "alias": alias }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        (
            body["device_id"].as_str().unwrap().to_string(),
            body["device_token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_is_public_but_admin_routes_are_not() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // a device bearer is not an admin credential
        let mut req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        req.headers_mut()
            .insert("x-device-token", "some-device-token".parse().unwrap());
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn responses_carry_a_request_id() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.headers().contains_key("x-request-id"));

        let mut req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        req.headers_mut()
            .insert("x-request-id", "corr-42".parse().unwrap());
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.headers()["x-request-id"], "corr-42");
    }

    #[tokio::test]
    async fn register_then_heartbeat_round_trip() {
        let provider = provider_stub().await;
        let (app, store) = test_app(&provider).await;
        let (device_id, token) = register_device(&app, "kiosk-1").await;

        let resp = app
            .clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "battery": { "pct": 80 } })),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["created"], true);

        let ls = store
            .get_last_status(&drover_domain::DeviceId::new(&device_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ls.battery_pct, Some(80));
    }

    #[tokio::test]
    async fn heartbeat_auth_failures() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        register_device(&app, "kiosk-1").await;

        // missing token
        let resp = app
            .clone()
            .oneshot(post_json("/v1/heartbeat", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // wrong token — same opaque shape
        let resp = app
            .clone()
            .oneshot(with_device(post_json("/v1/heartbeat", json!({})), "bogus"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(resp).await;
        assert_eq!(body["detail"], "unauthorized");
    }

    #[tokio::test]
    async fn duplicate_alias_is_409() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        register_device(&app, "kiosk-1").await;

        let resp = app
            .clone()
            .oneshot(with_admin(post_json("/v1/register", json!({ "alias": "kiosk-1" }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn command_dispatch_returns_request_id() {
        let provider = provider_stub().await;
        let (app, store) = test_app(&provider).await;
        let (device_id, token) = register_device(&app, "kiosk-1").await;

        // heartbeat with an fcm token so the device is pushable
        app.clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "fcm_token": "push-tok" })),
                &token,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                &format!("/v1/devices/{device_id}/commands/ping"),
                json!({}),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let request_id = body["request_id"].as_str().unwrap();
        assert_eq!(body["fcm_status"], "sent");

        let row = store.get_dispatch(request_id).await.unwrap().unwrap();
        assert_eq!(row.device_id.as_str(), device_id);
    }

    #[tokio::test]
    async fn launch_app_requires_package_name() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        let (device_id, _) = register_device(&app, "kiosk-1").await;

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                &format!("/v1/devices/{device_id}/commands/launch_app"),
                json!({}),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn action_result_is_idempotent_end_to_end() {
        let provider = provider_stub().await;
        let (app, store) = test_app(&provider).await;
        let (device_id, token) = register_device(&app, "kiosk-1").await;

        app.clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "fcm_token": "push-tok" })),
                &token,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                &format!("/v1/devices/{device_id}/commands/ping"),
                json!({}),
            )))
            .await
            .unwrap();
        let request_id = body_json(resp).await["request_id"].as_str().unwrap().to_string();

        // first ack completes, second is an idempotent no-op
        let ack = json!({ "request_id": request_id, "status": "OK", "message": "pong" });
        let resp = app
            .clone()
            .oneshot(with_device(post_json("/v1/action-result", ack.clone()), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["idempotent"], false);

        let resp = app
            .clone()
            .oneshot(with_device(post_json("/v1/action-result", ack), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["idempotent"], true);

        let row = store.get_dispatch(&request_id).await.unwrap().unwrap();
        assert_eq!(row.result.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn foreign_device_ack_is_403_without_mutation() {
        let provider = provider_stub().await;
        let (app, store) = test_app(&provider).await;
        let (d2_id, d2_token) = register_device(&app, "kiosk-2").await;
        let (_d3_id, d3_token) = register_device(&app, "kiosk-3").await;

        app.clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "fcm_token": "push-tok" })),
                &d2_token,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                &format!("/v1/devices/{d2_id}/commands/ping"),
                json!({}),
            )))
            .await
            .unwrap();
        let request_id = body_json(resp).await["request_id"].as_str().unwrap().to_string();

        // d3 claims d2's dispatch
        let resp = app
            .clone()
            .oneshot(with_device(
                post_json(
                    "/v1/action-result",
                    json!({ "request_id": request_id, "status": "OK" }),
                ),
                &d3_token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let row = store.get_dispatch(&request_id).await.unwrap().unwrap();
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn remote_exec_shell_gated_by_allow_list() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        let (_, token) = register_device(&app, "kiosk-1").await;
        app.clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "fcm_token": "push-tok" })),
                &token,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                "/v1/remote-exec",
                json!({
                    "mode": "shell",
                    "targets": { "all": true },
                    "command": "rm -rf /",
                }),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                "/v1/remote-exec",
                json!({
                    "mode": "shell",
                    "targets": { "all": true },
                    "command": "svc wifi enable",
                    "dry_run": true,
                }),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["dry_run"], true);
        assert_eq!(body["estimated_count"], 1);
    }

    #[tokio::test]
    async fn remote_exec_status_shows_per_device_results() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        let (_, token) = register_device(&app, "kiosk-1").await;
        app.clone()
            .oneshot(with_device(
                post_json("/v1/heartbeat", json!({ "fcm_token": "push-tok" })),
                &token,
            ))
            .await
            .unwrap();

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                "/v1/remote-exec",
                json!({
                    "mode": "fcm",
                    "targets": { "all": true },
                    "payload": { "type": "launch_app", "package_name": "com.x" },
                }),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let exec_id = body_json(resp).await["exec_id"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(with_admin(
                Request::builder()
                    .uri(format!("/v1/remote-exec/{exec_id}"))
                    .body(Body::empty())
                    .unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["stats"]["total_targets"], 1);
        assert_eq!(body["stats"]["sent_count"], 1);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enrollment_token_register_flow() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let resp = app
            .clone()
            .oneshot(with_admin(post_json(
                "/admin/enrollment-tokens",
                json!({ "alias": "kiosk-x", "uses_allowed": 1 }),
            )))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let secret = body_json(resp).await["enrollment_token"]
            .as_str()
            .unwrap()
            .to_string();

        // register with the token instead of the admin key
        let mut req = post_json("/v1/register", json!({ "alias": "kiosk-x" }));
        req.headers_mut()
            .insert("x-enrollment-token", secret.parse().unwrap());
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // the single-use budget is spent
        let mut req = post_json("/v1/register", json!({ "alias": "kiosk-y" }));
        req.headers_mut()
            .insert("x-enrollment-token", secret.parse().unwrap());
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ops_reconcile_runs_and_reports() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let resp = app
            .clone()
            .oneshot(with_admin(post_json("/ops/reconcile", json!({}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["report"]["repaired"], 0);
    }

    #[tokio::test]
    async fn metrics_exposition_is_text() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;
        register_device(&app, "kiosk-1").await;

        let resp = app
            .clone()
            .oneshot(with_admin(
                Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let huge = "x".repeat(2 * 1024 * 1024);
        let resp = app
            .clone()
            .oneshot(with_admin(post_json("/v1/register", json!({ "alias": huge }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn monitoring_defaults_round_trip() {
        let provider = provider_stub().await;
        let (app, _) = test_app(&provider).await;

        let resp = app
            .clone()
            .oneshot(with_admin(
                Request::builder()
                    .method(Method::PATCH)
                    .uri("/admin/settings/monitoring-defaults")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "threshold_min": 20 }).to_string()))
                    .unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["threshold_min"], 20);

        let resp = app
            .clone()
            .oneshot(with_admin(
                Request::builder()
                    .uri("/admin/settings/monitoring-defaults")
                    .body(Body::empty())
                    .unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["threshold_min"], 20);
    }
}
