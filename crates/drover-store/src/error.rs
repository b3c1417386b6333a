use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("dispatch not found: {0}")]
    DispatchNotFound(String),

    #[error("exec batch not found: {0}")]
    ExecNotFound(String),

    #[error("partition not found: {0}")]
    PartitionNotFound(String),

    /// Alias uniqueness violation during registration.
    #[error("device alias already exists: {0}")]
    DuplicateAlias(String),

    #[error("enrollment token not found: {0}")]
    TokenNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection loss and other transient backend failures; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Map an sqlx error, surfacing unique-violations on the alias key as
    /// the typed conflict the registration gate relies on.
    pub fn from_sqlx(e: sqlx::Error, alias: Option<&str>) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                if let Some(alias) = alias {
                    return StoreError::DuplicateAlias(alias.to_string());
                }
            }
        }
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(e.to_string())
            }
            other => StoreError::Internal(other.to_string()),
        }
    }
}
