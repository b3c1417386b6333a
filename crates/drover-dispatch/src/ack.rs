use std::sync::Arc;

use chrono::Utc;
use drover_domain::{bulk_correlation_id, DeviceId, ExecId};
use drover_store::{AckOutcome, Store};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::DispatchError;

/// Reply to a plain command dispatch (`POST /v1/action-result`).
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResultAck {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Stricter reply to a remote-exec dispatch (`POST /v1/remote-exec/ack`).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecAck {
    pub exec_id: String,
    pub device_id: String,
    pub correlation_id: String,
    pub status: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AckResponse {
    pub idempotent: bool,
}

/// C5 — close the loop on a dispatch when the device reports an outcome.
pub struct AckReceiver {
    store: Arc<dyn Store>,
}

impl AckReceiver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a device's reply to a single command.
    ///
    /// The authenticated device is authoritative: a reply naming someone
    /// else's dispatch is rejected before any mutation.
    pub async fn record_action_result(
        &self,
        device_id: &DeviceId,
        ack: ActionResultAck,
    ) -> Result<AckResponse, DispatchError> {
        let dispatch = self
            .store
            .get_dispatch(&ack.request_id)
            .await?
            .ok_or_else(|| DispatchError::DispatchNotFound(ack.request_id.clone()))?;

        if &dispatch.device_id != device_id {
            warn!(
                request_id = %ack.request_id,
                claimed = %device_id,
                owner = %dispatch.device_id,
                "ack rejected: device mismatch"
            );
            return Err(DispatchError::Forbidden(
                "dispatch does not belong to authenticated device".into(),
            ));
        }

        self.complete(&ack.request_id, &ack.status, message_of(&ack), dispatch.exec_id.as_ref())
            .await
    }

    /// Record a remote-exec reply with the `<exec_id>-<device_id>` binding.
    pub async fn record_exec_ack(
        &self,
        device_id: &DeviceId,
        ack: ExecAck,
    ) -> Result<AckResponse, DispatchError> {
        if ack.device_id != device_id.as_str() {
            return Err(DispatchError::Forbidden(
                "device_id in payload does not match authenticated device".into(),
            ));
        }

        let exec_id = ExecId::new(&ack.exec_id);
        let expected = bulk_correlation_id(&exec_id, device_id);
        if ack.correlation_id != expected {
            warn!(
                correlation_id = %ack.correlation_id,
                expected = %expected,
                "exec ack rejected: correlation binding mismatch"
            );
            return Err(DispatchError::Forbidden(
                "correlation ID does not match expected format or device".into(),
            ));
        }

        let dispatch = self
            .store
            .get_dispatch(&ack.correlation_id)
            .await?
            .ok_or_else(|| DispatchError::DispatchNotFound(ack.correlation_id.clone()))?;
        if &dispatch.device_id != device_id {
            return Err(DispatchError::Forbidden(
                "correlation ID does not belong to authenticated device".into(),
            ));
        }

        let message = ack
            .output
            .as_deref()
            .map(|o| truncate(o, 2000))
            .or_else(|| ack.error.clone());
        self.complete(&ack.correlation_id, &ack.status, message, Some(&exec_id))
            .await
    }

    async fn complete(
        &self,
        request_id: &str,
        status: &str,
        message: Option<String>,
        exec_id: Option<&ExecId>,
    ) -> Result<AckResponse, DispatchError> {
        let status_upper = status.to_uppercase();
        let succeeded = status_upper == "OK";

        let outcome = self
            .store
            .complete_dispatch(
                request_id,
                Utc::now(),
                &status_upper,
                message.as_deref(),
                succeeded,
            )
            .await?;

        match outcome {
            AckOutcome::AlreadyCompleted => {
                info!(request_id, "ack replay, already completed");
                Ok(AckResponse { idempotent: true })
            }
            AckOutcome::Completed => {
                // Parent counters move by atomic SQL increments so racing
                // acks for sibling dispatches never lose updates.
                if let Some(exec_id) = exec_id {
                    let (acked, errors) = match status_upper.as_str() {
                        "OK" => (1, 0),
                        "FAILED" | "DENIED" | "TIMEOUT" => (0, 1),
                        _ => (0, 0),
                    };
                    if acked + errors > 0 {
                        self.store
                            .bump_exec_counters(exec_id, 0, acked, errors)
                            .await?;
                    }
                }
                info!(request_id, status = %status_upper, "ack recorded");
                Ok(AckResponse { idempotent: false })
            }
        }
    }
}

fn message_of(ack: &ActionResultAck) -> Option<String> {
    ack.message
        .clone()
        .or_else(|| ack.output.as_deref().map(|o| truncate(o, 2000)))
        .or_else(|| ack.error.clone())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::{CommandAction, ExecMode, FcmStatus};
    use drover_store::{ExecBatchRow, InMemoryStore, NewDispatch};

    async fn store_with_dispatch(request_id: &str, device: &str, exec: Option<&str>) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        if let Some(exec_id) = exec {
            store
                .insert_exec_batch(&ExecBatchRow {
                    exec_id: ExecId::new(exec_id),
                    mode: ExecMode::Shell,
                    payload_hash: "h".into(),
                    created_by: "admin".into(),
                    status: "processing".into(),
                    total_targets: 1,
                    sent_count: 1,
                    acked_count: 0,
                    error_count: 0,
                    created_at: Utc::now(),
                    completed_at: None,
                })
                .await
                .unwrap();
        }
        store
            .insert_dispatch(NewDispatch {
                request_id: request_id.to_string(),
                device_id: DeviceId::new(device),
                action: CommandAction::Ping,
                exec_id: exec.map(ExecId::new),
                payload_hash: None,
                sent_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn ok_ack(request_id: &str) -> ActionResultAck {
        ActionResultAck {
            request_id: request_id.into(),
            status: "ok".into(),
            exit_code: Some(0),
            output: Some("pong".into()),
            error: None,
            message: None,
        }
    }

    #[tokio::test]
    async fn ack_completes_once_then_replays_idempotently() {
        let store = store_with_dispatch("r1", "d1", None).await;
        let receiver = AckReceiver::new(store.clone());
        let d1 = DeviceId::new("d1");

        let first = receiver.record_action_result(&d1, ok_ack("r1")).await.unwrap();
        assert!(!first.idempotent);

        let second = receiver.record_action_result(&d1, ok_ack("r1")).await.unwrap();
        assert!(second.idempotent);

        let row = store.get_dispatch("r1").await.unwrap().unwrap();
        assert_eq!(row.fcm_status, FcmStatus::Completed);
        assert_eq!(row.result.as_deref(), Some("OK"));
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_request_id_is_not_found() {
        let store = store_with_dispatch("r1", "d1", None).await;
        let receiver = AckReceiver::new(store);
        let err = receiver
            .record_action_result(&DeviceId::new("d1"), ok_ack("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DispatchNotFound(_)));
    }

    #[tokio::test]
    async fn foreign_device_cannot_complete_a_dispatch() {
        let store = store_with_dispatch("r1", "d2", None).await;
        let receiver = AckReceiver::new(store.clone());

        let err = receiver
            .record_action_result(&DeviceId::new("d3"), ok_ack("r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Forbidden(_)));

        // no mutation happened
        let row = store.get_dispatch("r1").await.unwrap().unwrap();
        assert!(row.completed_at.is_none());
    }

    #[tokio::test]
    async fn exec_ack_requires_the_correlation_binding() {
        let exec_id = "e1";
        let correlation = format!("{exec_id}-d1");
        let store = store_with_dispatch(&correlation, "d1", Some(exec_id)).await;
        let receiver = AckReceiver::new(store.clone());
        let d1 = DeviceId::new("d1");

        // wrong correlation format → 403, no mutation
        let bad = ExecAck {
            exec_id: exec_id.into(),
            device_id: "d1".into(),
            correlation_id: format!("{exec_id}-d2"),
            status: "OK".into(),
            exit_code: Some(0),
            output: None,
            error: None,
        };
        assert!(matches!(
            receiver.record_exec_ack(&d1, bad).await.unwrap_err(),
            DispatchError::Forbidden(_)
        ));

        let good = ExecAck {
            exec_id: exec_id.into(),
            device_id: "d1".into(),
            correlation_id: correlation.clone(),
            status: "OK".into(),
            exit_code: Some(0),
            output: Some("done".into()),
            error: None,
        };
        receiver.record_exec_ack(&d1, good.clone()).await.unwrap();

        let batch = store.get_exec_batch(&ExecId::new(exec_id)).await.unwrap().unwrap();
        assert_eq!(batch.acked_count, 1);

        // replay: idempotent, counter unchanged
        let replay = receiver.record_exec_ack(&d1, good).await.unwrap();
        assert!(replay.idempotent);
        let batch = store.get_exec_batch(&ExecId::new(exec_id)).await.unwrap().unwrap();
        assert_eq!(batch.acked_count, 1);
    }

    #[tokio::test]
    async fn failed_exec_ack_bumps_error_counter() {
        let exec_id = "e2";
        let correlation = format!("{exec_id}-d1");
        let store = store_with_dispatch(&correlation, "d1", Some(exec_id)).await;
        let receiver = AckReceiver::new(store.clone());

        receiver
            .record_exec_ack(
                &DeviceId::new("d1"),
                ExecAck {
                    exec_id: exec_id.into(),
                    device_id: "d1".into(),
                    correlation_id: correlation,
                    status: "failed".into(),
                    exit_code: Some(1),
                    output: None,
                    error: Some("permission denied".into()),
                },
            )
            .await
            .unwrap();

        let batch = store.get_exec_batch(&ExecId::new(exec_id)).await.unwrap().unwrap();
        assert_eq!(batch.acked_count, 0);
        assert_eq!(batch.error_count, 1);

        let row = store
            .get_dispatch(&format!("{exec_id}-d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.fcm_status, FcmStatus::Failed);
        assert_eq!(row.result.as_deref(), Some("FAILED"));
    }
}
