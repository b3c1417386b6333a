use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::PushError;

const FCM_BASE: &str = "https://fcm.googleapis.com";
const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

// ── Token provider ────────────────────────────────────────────────────────────

/// Abstraction over provider token acquisition — enables test injection.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, PushError>;
}

/// Production token provider backed by Application Default Credentials.
struct AdcTokenProvider {
    inner: std::sync::Arc<dyn gcp_auth::TokenProvider>,
}

#[async_trait]
impl TokenProvider for AdcTokenProvider {
    async fn token(&self) -> Result<String, PushError> {
        let token = self
            .inner
            .token(&[FCM_SCOPE])
            .await
            .map_err(|e| PushError::Auth(format!("FCM auth failed: {e}")))?;
        Ok(token.as_str().to_string())
    }
}

/// Fixed-token provider — tests and local stubs, no network call.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, PushError> {
        Ok(self.0.clone())
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Provider acknowledgement for a single message.
#[derive(Debug, Clone)]
pub struct PushAck {
    pub http_code: u16,
    pub message_id: Option<String>,
    pub latency_ms: i64,
}

/// FCM v1 HTTP client.
///
/// One message per call: `{message: {token, data, android: {priority: high}}}`.
/// 2xx with a `name` field is success; anything else is a typed failure the
/// dispatcher records. The client itself never retries.
pub struct PushClient {
    client: reqwest::Client,
    token: Box<dyn TokenProvider>,
    base: String,
    project_id: String,
}

impl PushClient {
    /// Create a client using Application Default Credentials.
    ///
    /// ADC resolution order:
    /// 1. `GOOGLE_APPLICATION_CREDENTIALS` env var (service account JSON key)
    /// 2. Workload Identity (when running on GCP)
    /// 3. `gcloud auth application-default login` for local dev
    pub async fn from_adc(project_id: impl Into<String>) -> Result<Self, PushError> {
        let inner = gcp_auth::provider()
            .await
            .map_err(|e| PushError::Auth(format!("failed to initialise ADC: {e}")))?;
        Ok(Self {
            client: http_client(),
            token: Box::new(AdcTokenProvider { inner }),
            base: FCM_BASE.to_string(),
            project_id: project_id.into(),
        })
    }

    /// Create a client with a fixed bearer token and custom base URL.
    /// Used by tests and by deployments pointing at a provider stub.
    pub fn with_static_token(
        project_id: impl Into<String>,
        token: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            token: Box::new(StaticToken(token.into())),
            base: base.into(),
            project_id: project_id.into(),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.base, self.project_id
        )
    }

    /// Deliver one data message to a device push endpoint.
    ///
    /// `data` values must already be strings — FCM rejects non-string data
    /// fields. The BTreeMap keeps the payload key order deterministic.
    pub async fn send(
        &self,
        device_fcm_token: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<PushAck, PushError> {
        let bearer = self.token.token().await?;
        let url = self.send_url();
        let envelope = json!({
            "message": {
                "token": device_fcm_token,
                "data": data,
                "android": { "priority": "high" },
            }
        });

        debug!(url = %url, "push send");
        let start = Instant::now();
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&bearer)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout
                } else {
                    PushError::Transport(e.to_string())
                }
            })?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let http_code = resp.status().as_u16();
        if !resp.status().is_success() {
            let body: Value = resp.json().await.unwrap_or_default();
            let message = extract_fcm_error(&body);
            warn!(http_code, %message, "push rejected");
            return Err(PushError::Provider { http_code, message });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| PushError::Transport(format!("decode provider response: {e}")))?;
        let message_id = body["name"].as_str().map(str::to_string);

        Ok(PushAck { http_code, message_id, latency_ms })
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PUSH_TIMEOUT)
        .build()
        .expect("http client construction")
}

/// Condense an FCM error envelope into a one-line message.
fn extract_fcm_error(body: &Value) -> String {
    let err = &body["error"];
    let status = err["status"].as_str().unwrap_or("UNKNOWN");
    let message = err["message"].as_str().unwrap_or("unknown error");
    format!("{status}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PushClient {
        PushClient::with_static_token("proj-1", "fake-token", server.uri())
    }

    fn data() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("action".to_string(), "ping".to_string()),
            ("request_id".to_string(), "r-1".to_string()),
        ])
    }

    #[tokio::test]
    async fn send_success_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/proj-1/messages:send"))
            .and(header("authorization", "Bearer fake-token"))
            .and(body_partial_json(serde_json::json!({
                "message": {
                    "token": "device-token",
                    "android": { "priority": "high" },
                    "data": { "action": "ping" },
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/proj-1/messages/msg-123"
            })))
            .mount(&server)
            .await;

        let ack = client(&server).send("device-token", &data()).await.unwrap();
        assert_eq!(ack.http_code, 200);
        assert_eq!(
            ack.message_id.as_deref(),
            Some("projects/proj-1/messages/msg-123")
        );
    }

    #[tokio::test]
    async fn provider_error_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/proj-1/messages:send"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": { "status": "NOT_FOUND", "message": "Requested entity was not found." }
            })))
            .mount(&server)
            .await;

        let err = client(&server).send("stale-token", &data()).await.unwrap_err();
        match err {
            PushError::Provider { http_code, message } => {
                assert_eq!(http_code, 404);
                assert!(message.contains("NOT_FOUND"));
            }
            other => panic!("expected Provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_name_still_acks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/proj-1/messages:send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let ack = client(&server).send("device-token", &data()).await.unwrap();
        assert_eq!(ack.http_code, 200);
        assert!(ack.message_id.is_none());
    }
}
