use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::JobError;

/// External object storage for partition archives.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store `bytes` under `key`, returning the canonical URL of the object.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, JobError>;
}

/// HTTP blob store: `PUT {base}/{key}` with the raw bytes as body.
/// Works against S3/GCS-compatible gateways and the wiremock test double.
pub struct HttpBlobStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, JobError> {
        let url = self.url_for(key);
        debug!(url = %url, size = bytes.len(), "archive upload");
        let resp = self
            .client
            .put(&url)
            .header("content-type", "text/csv")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| JobError::Blob(format!("PUT {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(JobError::Blob(format!(
                "PUT {url}: http {}",
                resp.status().as_u16()
            )));
        }
        Ok(url)
    }
}

/// In-memory blob store for tests; keeps every object for later inspection.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, JobError> {
        self.objects
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("mem://archives/{key}"))
    }
}

/// Blob store that always fails — drives the archive_failed path in tests.
#[cfg(test)]
pub(crate) struct FailingBlobStore;

#[cfg(test)]
#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, key: &str, _bytes: &[u8]) -> Result<String, JobError> {
        Err(JobError::Blob(format!("simulated upload failure for {key}")))
    }
}
