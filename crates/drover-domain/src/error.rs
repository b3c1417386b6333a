use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid alias: {0}")]
    InvalidAlias(String),

    #[error("invalid command action: {0}")]
    InvalidAction(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Alias constraints for device registration: 1–200 characters.
pub fn validate_alias(alias: &str) -> Result<(), DomainError> {
    if alias.is_empty() {
        return Err(DomainError::InvalidAlias(
            "alias must be at least 1 character".into(),
        ));
    }
    if alias.chars().count() > 200 {
        return Err(DomainError::InvalidAlias(
            "alias must be 200 characters or less".into(),
        ));
    }
    Ok(())
}
