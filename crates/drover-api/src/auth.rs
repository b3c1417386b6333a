use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const DEVICE_TOKEN_HEADER: &str = "x-device-token";
pub const ENROLLMENT_TOKEN_HEADER: &str = "x-enrollment-token";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Constant-time admin key check. Device bearers are structurally unable to
/// pass: only this header is consulted on admin routes.
pub fn admin_key_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|provided| {
            provided.as_bytes().ct_eq(expected.as_bytes()).into()
        })
        .unwrap_or(false)
}

/// Middleware guarding every admin route.
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if admin_key_matches(request.headers(), &state.admin_key) {
        next.run(request).await
    } else {
        ApiError::unauthorized().into_response()
    }
}

/// Extract the device bearer secret; device-scope endpoints reject admin
/// and enrollment credentials by simply never reading their headers.
pub fn device_secret(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(DEVICE_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(ApiError::unauthorized)
}

/// Middleware stamping every response with a correlation id, echoed from
/// the request when present. 5xx investigations start from this id.
pub async fn request_id(request: Request, next: Next) -> Response {
    let req_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;
    if response.status().is_server_error() {
        tracing::error!(request_id = %req_id, status = %response.status(), "request failed");
    }
    if let Ok(value) = axum::http::HeaderValue::from_str(&req_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, value);
    }
    response
}
