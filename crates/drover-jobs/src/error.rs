use drover_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("blob store: {0}")]
    Blob(String),

    #[error("archive encoding: {0}")]
    Encoding(String),
}
