use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error envelope: `{"detail": "..."}` plus an optional machine-readable
/// `reason`, and `Retry-After` on 429s.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reason: Option<&'static str>,
    pub retry_after_s: Option<i64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError { status, message: message.into(), reason: None, retry_after_s: None }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, msg)
    }

    pub fn gone(msg: impl Into<String>, reason: &'static str) -> Self {
        ApiError {
            status: StatusCode::GONE,
            message: msg.into(),
            reason: Some(reason),
            retry_after_s: None,
        }
    }

    pub fn rate_limited(retry_after_s: i64) -> Self {
        ApiError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: format!("rate limited, retry after {retry_after_s}s"),
            reason: None,
            retry_after_s: Some(retry_after_s),
        }
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.reason {
            Some(reason) => json!({ "detail": self.message, "reason": reason }),
            None => json!({ "detail": self.message }),
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry) = self.retry_after_s {
            if let Ok(value) = header::HeaderValue::from_str(&retry.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ── Component error translation ───────────────────────────────────────────────
//
// Boundaries map low-level errors into the HTTP kinds; storage details never
// leak to callers.

impl From<drover_store::StoreError> for ApiError {
    fn from(e: drover_store::StoreError) -> Self {
        use drover_store::StoreError;
        match e {
            StoreError::Unavailable(_) => ApiError::unavailable("storage temporarily unavailable"),
            StoreError::DeviceNotFound(id) => ApiError::not_found(format!("device '{id}' not found")),
            StoreError::DispatchNotFound(id) => {
                ApiError::not_found(format!("request_id '{id}' not found"))
            }
            StoreError::ExecNotFound(id) => ApiError::not_found(format!("exec '{id}' not found")),
            StoreError::TokenNotFound(_) => ApiError::not_found("token not found"),
            StoreError::DuplicateAlias(alias) => {
                ApiError::conflict(format!("device with alias '{alias}' already exists"))
            }
            other => {
                // storage detail stays in the logs, never in the response
                tracing::error!(error = %other, "store error");
                ApiError::internal("internal error")
            }
        }
    }
}

impl From<drover_ingest::IngestError> for ApiError {
    fn from(e: drover_ingest::IngestError) -> Self {
        use drover_ingest::IngestError;
        match e {
            IngestError::Unauthorized | IngestError::EnrollmentRejected(_) => {
                ApiError::unauthorized()
            }
            IngestError::DeviceDeleted { .. } => {
                ApiError::gone("device has been deleted", "device_deleted")
            }
            IngestError::Validation(msg) => ApiError::unprocessable(msg),
            IngestError::DuplicateAlias(alias) => {
                ApiError::conflict(format!("device with alias '{alias}' already exists"))
            }
            IngestError::Store(e) => e.into(),
        }
    }
}

impl From<drover_dispatch::DispatchError> for ApiError {
    fn from(e: drover_dispatch::DispatchError) -> Self {
        use drover_dispatch::DispatchError;
        match e {
            DispatchError::DeviceNotFound(id) => {
                ApiError::not_found(format!("device '{id}' not found"))
            }
            DispatchError::DispatchNotFound(id) => {
                ApiError::not_found(format!("request_id '{id}' not found"))
            }
            DispatchError::Validation(msg) | DispatchError::AllowList(msg) => {
                ApiError::unprocessable(msg)
            }
            DispatchError::Conflict(id) => {
                ApiError::conflict(format!("request_id '{id}' already used with different fields"))
            }
            DispatchError::Forbidden(msg) => ApiError::forbidden(msg),
            DispatchError::RateLimited { retry_after_s } => ApiError::rate_limited(retry_after_s),
            DispatchError::Provider(e) => ApiError::bad_gateway(format!("push provider: {e}")),
            DispatchError::Store(e) => e.into(),
        }
    }
}

impl From<drover_jobs::JobError> for ApiError {
    fn from(e: drover_jobs::JobError) -> Self {
        use drover_jobs::JobError;
        match e {
            JobError::Store(e) => e.into(),
            other => ApiError::internal(other.to_string()),
        }
    }
}
