use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push auth failed: {0}")]
    Auth(String),

    /// Non-2xx from the provider. A provider ack is only transport-level:
    /// it never implies device execution.
    #[error("push provider rejected message: http {http_code}: {message}")]
    Provider { http_code: u16, message: String },

    #[error("push provider timed out")]
    Timeout,

    #[error("push transport error: {0}")]
    Transport(String),
}
