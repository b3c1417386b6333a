use drover_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing, malformed, or wrong bearer secret. Deliberately carries no
    /// detail — every auth failure looks the same to the caller.
    #[error("unauthorized")]
    Unauthorized,

    /// The device row exists but its token was revoked (device deleted).
    #[error("device deleted")]
    DeviceDeleted { revoked_at: chrono::DateTime<chrono::Utc> },

    #[error("enrollment rejected: {0}")]
    EnrollmentRejected(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<drover_domain::DomainError> for IngestError {
    fn from(e: drover_domain::DomainError) -> Self {
        IngestError::Validation(e.to_string())
    }
}
