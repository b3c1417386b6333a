use drover_push::PushError;
use drover_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("dispatch not found: {0}")]
    DispatchNotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    /// Shell payload rejected by the allow-list; the message names the
    /// offending command or package.
    #[error("command not allowed: {0}")]
    AllowList(String),

    /// Replay of an existing request_id with different fields.
    #[error("request_id conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: i64 },

    /// Push-provider failure; the ledger row was updated before this
    /// surfaced. The dispatcher never retries on its own.
    #[error(transparent)]
    Provider(#[from] PushError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
