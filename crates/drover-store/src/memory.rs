use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use drover_domain::{
    AlertCondition, DeviceId, ExecId, FcmStatus, MonitoringDefaults, MonitoringOverrides,
    PartitionLifecycle, TokenStatus,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{
    partition_name_for, AckOutcome, AlertStateRow, BloatwareRow, DeviceEventRow, DeviceRow,
    DispatchRow, DispatchUpdate, EnrollmentTokenRow, ExecBatchRow, HeartbeatRow, HeartbeatWrite,
    LastStatusRow, NewDispatch, PartitionRow, StaleProjection, TokenConsumption,
};
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceId, DeviceRow>,
    heartbeats: Vec<HeartbeatRow>,
    hb_buckets: HashSet<(String, i64)>,
    last_status: HashMap<DeviceId, LastStatusRow>,
    dispatches: HashMap<String, DispatchRow>,
    exec_batches: HashMap<String, ExecBatchRow>,
    alert_states: HashMap<(String, AlertCondition), AlertStateRow>,
    enrollment_tokens: HashMap<String, EnrollmentTokenRow>,
    partitions: BTreeMap<String, PartitionRow>,
    events: Vec<DeviceEventRow>,
    next_event_id: i64,
    bloatware: HashMap<String, BloatwareRow>,
    monitoring_defaults: Option<MonitoringDefaults>,
    locks: HashSet<i64>,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Backs unit tests and local development;
/// the write paths mirror the Postgres semantics (bucket uniqueness, guarded
/// upsert, write-once completion) so invariants can be exercised without a
/// database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete a projection row. Not part of [`Store`]; used to simulate
    /// drift when exercising the reconciliation path.
    pub async fn delete_last_status(&self, id: &DeviceId) {
        let mut guard = self.inner.write().await;
        guard.last_status.remove(id);
    }
}

fn upsert_last_status_guarded(map: &mut HashMap<DeviceId, LastStatusRow>, row: &LastStatusRow) {
    match map.get(&row.device_id) {
        Some(existing) if existing.last_ts > row.last_ts => {}
        _ => {
            map.insert(row.device_id.clone(), row.clone());
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    // ── Devices ───────────────────────────────────────────────────────────────

    async fn create_device(&self, row: &DeviceRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.devices.values().any(|d| d.alias == row.alias) {
            return Err(StoreError::DuplicateAlias(row.alias.clone()));
        }
        guard.devices.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<DeviceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(id).cloned())
    }

    async fn get_device_by_token_id(
        &self,
        token_id: &str,
    ) -> Result<Option<DeviceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .devices
            .values()
            .find(|d| d.token_id.as_deref() == Some(token_id))
            .cloned())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<DeviceRow> = guard.devices.values().cloned().collect();
        all.sort_by(|a, b| a.alias.cmp(&b.alias));
        Ok(all)
    }

    async fn list_devices_missing_token_id(&self) -> Result<Vec<DeviceRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .devices
            .values()
            .filter(|d| d.token_id.is_none())
            .cloned()
            .collect())
    }

    async fn set_device_token_id(&self, id: &DeviceId, token_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        device.token_id = Some(token_id.to_string());
        Ok(())
    }

    async fn touch_device(
        &self,
        id: &DeviceId,
        seen_at: DateTime<Utc>,
        fcm_token: Option<&str>,
        agent_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        device.last_seen = seen_at;
        if let Some(t) = fcm_token {
            device.fcm_token = Some(t.to_string());
        }
        if let Some(v) = agent_version {
            device.agent_version = Some(v.to_string());
        }
        Ok(())
    }

    async fn update_device_monitoring(
        &self,
        id: &DeviceId,
        monitoring: &MonitoringOverrides,
        auto_relaunch_enabled: Option<bool>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let device = guard
            .devices
            .get_mut(id)
            .ok_or_else(|| StoreError::DeviceNotFound(id.to_string()))?;
        device.monitoring = monitoring.clone();
        if let Some(enabled) = auto_relaunch_enabled {
            device.auto_relaunch_enabled = enabled;
        }
        Ok(())
    }

    // ── Heartbeats ────────────────────────────────────────────────────────────

    async fn record_heartbeat(
        &self,
        hb: &HeartbeatRow,
        last: &LastStatusRow,
    ) -> Result<HeartbeatWrite, StoreError> {
        let mut guard = self.inner.write().await;
        let key = (hb.device_id.to_string(), hb.bucket_ts.timestamp());
        let created = guard.hb_buckets.insert(key);
        if created {
            guard.heartbeats.push(hb.clone());
        }
        upsert_last_status_guarded(&mut guard.last_status, last);
        Ok(HeartbeatWrite { created })
    }

    async fn get_last_status(&self, id: &DeviceId) -> Result<Option<LastStatusRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.last_status.get(id).cloned())
    }

    async fn list_last_status(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<Vec<LastStatusRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(device_ids
            .iter()
            .filter_map(|id| guard.last_status.get(id).cloned())
            .collect())
    }

    async fn latest_heartbeats(
        &self,
        device_ids: &[DeviceId],
        per_device: usize,
        window: Duration,
    ) -> Result<Vec<HeartbeatRow>, StoreError> {
        let guard = self.inner.read().await;
        let floor = Utc::now() - window;
        let wanted: HashSet<&DeviceId> = device_ids.iter().collect();

        let mut by_device: HashMap<DeviceId, Vec<HeartbeatRow>> = HashMap::new();
        for hb in guard
            .heartbeats
            .iter()
            .filter(|hb| hb.ts > floor && wanted.contains(&hb.device_id))
        {
            by_device.entry(hb.device_id.clone()).or_default().push(hb.clone());
        }

        let mut out = Vec::new();
        for (_, mut rows) in by_device {
            rows.sort_by(|a, b| b.ts.cmp(&a.ts));
            rows.truncate(per_device);
            out.extend(rows);
        }
        Ok(out)
    }

    // ── Dispatch ledger ───────────────────────────────────────────────────────

    async fn insert_dispatch(&self, new: NewDispatch) -> Result<(DispatchRow, bool), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.dispatches.get(&new.request_id) {
            return Ok((existing.clone(), false));
        }
        let row = new.into_row();
        guard.dispatches.insert(row.request_id.clone(), row.clone());
        Ok((row, true))
    }

    async fn get_dispatch(&self, request_id: &str) -> Result<Option<DispatchRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.dispatches.get(request_id).cloned())
    }

    async fn update_dispatch_outcome(
        &self,
        request_id: &str,
        update: DispatchUpdate,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .dispatches
            .get_mut(request_id)
            .ok_or_else(|| StoreError::DispatchNotFound(request_id.to_string()))?;
        match update {
            DispatchUpdate::Sent { http_code, fcm_message_id, latency_ms } => {
                row.fcm_status = FcmStatus::Sent;
                row.http_code = Some(http_code);
                row.fcm_message_id = fcm_message_id;
                row.latency_ms = Some(latency_ms);
            }
            DispatchUpdate::Failed { http_code, error_msg, latency_ms } => {
                row.fcm_status = FcmStatus::Failed;
                row.http_code = http_code;
                row.error_msg = Some(error_msg);
                row.latency_ms = latency_ms;
            }
        }
        Ok(())
    }

    async fn complete_dispatch(
        &self,
        request_id: &str,
        completed_at: DateTime<Utc>,
        result: &str,
        result_message: Option<&str>,
        succeeded: bool,
    ) -> Result<AckOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .dispatches
            .get_mut(request_id)
            .ok_or_else(|| StoreError::DispatchNotFound(request_id.to_string()))?;
        if row.completed_at.is_some() {
            return Ok(AckOutcome::AlreadyCompleted);
        }
        row.completed_at = Some(completed_at);
        row.result = Some(result.to_string());
        row.result_message = result_message.map(str::to_string);
        row.fcm_status = if succeeded { FcmStatus::Completed } else { FcmStatus::Failed };
        Ok(AckOutcome::Completed)
    }

    async fn list_dispatches_for_exec(
        &self,
        exec_id: &ExecId,
    ) -> Result<Vec<DispatchRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<DispatchRow> = guard
            .dispatches
            .values()
            .filter(|d| d.exec_id.as_ref() == Some(exec_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        Ok(rows)
    }

    // ── Exec batches ──────────────────────────────────────────────────────────

    async fn insert_exec_batch(&self, row: &ExecBatchRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.exec_batches.insert(row.exec_id.to_string(), row.clone());
        Ok(())
    }

    async fn get_exec_batch(&self, exec_id: &ExecId) -> Result<Option<ExecBatchRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.exec_batches.get(exec_id.as_str()).cloned())
    }

    async fn list_exec_batches(&self, limit: u32) -> Result<Vec<ExecBatchRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<ExecBatchRow> = guard.exec_batches.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn finish_exec_batch(
        &self,
        exec_id: &ExecId,
        status: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .exec_batches
            .get_mut(exec_id.as_str())
            .ok_or_else(|| StoreError::ExecNotFound(exec_id.to_string()))?;
        row.status = status.to_string();
        row.completed_at = Some(completed_at);
        Ok(())
    }

    async fn bump_exec_counters(
        &self,
        exec_id: &ExecId,
        sent: i64,
        acked: i64,
        errors: i64,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .exec_batches
            .get_mut(exec_id.as_str())
            .ok_or_else(|| StoreError::ExecNotFound(exec_id.to_string()))?;
        row.sent_count += sent;
        row.acked_count += acked;
        row.error_count += errors;
        Ok(())
    }

    // ── Alert state ───────────────────────────────────────────────────────────

    async fn list_alert_states(
        &self,
        device_ids: &[DeviceId],
    ) -> Result<Vec<AlertStateRow>, StoreError> {
        let guard = self.inner.read().await;
        let wanted: HashSet<&str> = device_ids.iter().map(|d| d.as_str()).collect();
        Ok(guard
            .alert_states
            .values()
            .filter(|s| wanted.contains(s.device_id.as_str()))
            .cloned()
            .collect())
    }

    async fn upsert_alert_state(&self, row: &AlertStateRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .alert_states
            .insert((row.device_id.to_string(), row.condition), row.clone());
        Ok(())
    }

    // ── Enrollment tokens ─────────────────────────────────────────────────────

    async fn insert_enrollment_token(&self, row: &EnrollmentTokenRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.enrollment_tokens.insert(row.token_id.clone(), row.clone());
        Ok(())
    }

    async fn get_enrollment_token(
        &self,
        token_id: &str,
    ) -> Result<Option<EnrollmentTokenRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.enrollment_tokens.get(token_id).cloned())
    }

    async fn list_enrollment_tokens(&self) -> Result<Vec<EnrollmentTokenRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<EnrollmentTokenRow> =
            guard.enrollment_tokens.values().cloned().collect();
        rows.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(rows)
    }

    async fn revoke_enrollment_token(&self, token_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .enrollment_tokens
            .get_mut(token_id)
            .ok_or_else(|| StoreError::TokenNotFound(token_id.to_string()))?;
        row.status = TokenStatus::Revoked;
        Ok(())
    }

    async fn consume_enrollment_token(
        &self,
        token_id: &str,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<TokenConsumption, StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .enrollment_tokens
            .get_mut(token_id)
            .ok_or_else(|| StoreError::TokenNotFound(token_id.to_string()))?;

        match row.status {
            TokenStatus::Revoked => return Ok(TokenConsumption::Revoked),
            TokenStatus::Used => return Ok(TokenConsumption::Exhausted),
            TokenStatus::Active => {}
        }
        if row.expires_at <= now {
            return Ok(TokenConsumption::Expired);
        }
        if row.uses_consumed >= row.uses_allowed {
            return Ok(TokenConsumption::Exhausted);
        }

        row.uses_consumed += 1;
        row.device_id = Some(device_id.clone());
        row.used_at = Some(now);
        if row.uses_consumed >= row.uses_allowed {
            row.status = TokenStatus::Used;
        }
        Ok(TokenConsumption::Consumed)
    }

    // ── Partition lifecycle ───────────────────────────────────────────────────

    async fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        let name = partition_name_for(day);
        if guard.partitions.contains_key(&name) {
            return Ok(false);
        }
        let range_start = day
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| StoreError::Internal("invalid partition day".into()))?;
        let range_end = range_start + Duration::days(1);
        guard.partitions.insert(
            name.clone(),
            PartitionRow {
                partition_name: name,
                range_start,
                range_end,
                state: PartitionLifecycle::Active,
                row_count: None,
                bytes_size: None,
                checksum_sha256: None,
                archive_url: None,
                created_at: Utc::now(),
                archived_at: None,
                dropped_at: None,
            },
        );
        Ok(true)
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.partitions.values().cloned().collect())
    }

    async fn partitions_due_for_archive(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PartitionRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .partitions
            .values()
            .filter(|p| p.state == PartitionLifecycle::Active && p.range_end < cutoff)
            .cloned()
            .collect())
    }

    async fn droppable_partitions(&self) -> Result<Vec<PartitionRow>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .partitions
            .values()
            .filter(|p| p.droppable())
            .cloned()
            .collect())
    }

    async fn export_partition_rows(
        &self,
        partition: &PartitionRow,
    ) -> Result<Vec<HeartbeatRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<HeartbeatRow> = guard
            .heartbeats
            .iter()
            .filter(|hb| hb.ts >= partition.range_start && hb.ts < partition.range_end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.device_id.0.cmp(&b.device_id.0)));
        Ok(rows)
    }

    async fn mark_partition_archived(
        &self,
        partition_name: &str,
        row_count: i64,
        checksum_sha256: &str,
        archive_url: &str,
        archived_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .partitions
            .get_mut(partition_name)
            .ok_or_else(|| StoreError::PartitionNotFound(partition_name.to_string()))?;
        row.state = PartitionLifecycle::Archived;
        row.row_count = Some(row_count);
        row.checksum_sha256 = Some(checksum_sha256.to_string());
        row.archive_url = Some(archive_url.to_string());
        row.archived_at = Some(archived_at);
        Ok(())
    }

    async fn mark_partition_archive_failed(
        &self,
        partition_name: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let row = guard
            .partitions
            .get_mut(partition_name)
            .ok_or_else(|| StoreError::PartitionNotFound(partition_name.to_string()))?;
        row.state = PartitionLifecycle::ArchiveFailed;
        Ok(())
    }

    async fn drop_partition(
        &self,
        partition_name: &str,
        dropped_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let (range_start, range_end) = {
            let row = guard
                .partitions
                .get_mut(partition_name)
                .ok_or_else(|| StoreError::PartitionNotFound(partition_name.to_string()))?;
            row.state = PartitionLifecycle::Dropped;
            row.dropped_at = Some(dropped_at);
            (row.range_start, row.range_end)
        };
        guard
            .heartbeats
            .retain(|hb| hb.ts < range_start || hb.ts >= range_end);
        guard.hb_buckets.retain(|(_, bucket)| {
            *bucket < range_start.timestamp() || *bucket >= range_end.timestamp()
        });
        Ok(())
    }

    async fn refresh_partition_stats(&self) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let counts: Vec<(String, i64)> = guard
            .partitions
            .values()
            .filter(|p| p.state == PartitionLifecycle::Active)
            .map(|p| {
                let n = guard
                    .heartbeats
                    .iter()
                    .filter(|hb| hb.ts >= p.range_start && hb.ts < p.range_end)
                    .count() as i64;
                (p.partition_name.clone(), n)
            })
            .collect();
        let updated = counts.len() as u64;
        for (name, n) in counts {
            if let Some(p) = guard.partitions.get_mut(&name) {
                p.row_count = Some(n);
                p.bytes_size = Some(n * 128);
            }
        }
        Ok(updated)
    }

    async fn vacuum_recent_partitions(&self, days: i64) -> Result<u64, StoreError> {
        let guard = self.inner.read().await;
        let cutoff = Utc::now() - Duration::days(days);
        Ok(guard
            .partitions
            .values()
            .filter(|p| p.state == PartitionLifecycle::Active && p.range_start >= cutoff)
            .count() as u64)
    }

    // ── Reconciliation ────────────────────────────────────────────────────────

    async fn stale_last_status(&self, max_rows: u32) -> Result<Vec<StaleProjection>, StoreError> {
        let guard = self.inner.read().await;
        let mut latest: HashMap<&DeviceId, &HeartbeatRow> = HashMap::new();
        for hb in &guard.heartbeats {
            match latest.get(&hb.device_id) {
                Some(existing) if existing.ts >= hb.ts => {}
                _ => {
                    latest.insert(&hb.device_id, hb);
                }
            }
        }

        let mut out = Vec::new();
        for (device_id, hb) in latest {
            let stale_ts = guard.last_status.get(device_id).map(|ls| ls.last_ts);
            let needs_repair = match stale_ts {
                None => true,
                Some(ts) => ts < hb.ts,
            };
            if needs_repair {
                out.push(StaleProjection {
                    device_id: device_id.clone(),
                    latest: hb.clone(),
                    stale_ts,
                });
                if out.len() >= max_rows as usize {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn upsert_last_status(&self, row: &LastStatusRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        upsert_last_status_guarded(&mut guard.last_status, row);
        Ok(())
    }

    // ── Advisory locks ────────────────────────────────────────────────────────

    async fn try_advisory_lock(&self, lock_id: i64) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.locks.insert(lock_id))
    }

    async fn advisory_unlock(&self, lock_id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.locks.remove(&lock_id);
        Ok(())
    }

    // ── Audit events ──────────────────────────────────────────────────────────

    async fn append_device_event(
        &self,
        device_id: &DeviceId,
        event_type: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.next_event_id += 1;
        let id = guard.next_event_id;
        guard.events.push(DeviceEventRow {
            id,
            device_id: device_id.clone(),
            event_type: event_type.to_string(),
            ts: Utc::now(),
            details,
        });
        Ok(())
    }

    async fn list_device_events(
        &self,
        device_id: Option<&DeviceId>,
        limit: u32,
    ) -> Result<Vec<DeviceEventRow>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<DeviceEventRow> = guard
            .events
            .iter()
            .filter(|ev| device_id.map_or(true, |id| &ev.device_id == id))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }

    // ── Registries ────────────────────────────────────────────────────────────

    async fn list_bloatware(&self) -> Result<Vec<BloatwareRow>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<BloatwareRow> = guard.bloatware.values().cloned().collect();
        rows.sort_by(|a, b| a.package_name.cmp(&b.package_name));
        Ok(rows)
    }

    async fn upsert_bloatware(&self, row: &BloatwareRow) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.bloatware.insert(row.package_name.clone(), row.clone());
        Ok(())
    }

    async fn remove_bloatware(&self, package_name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.bloatware.remove(package_name);
        Ok(())
    }

    async fn get_monitoring_defaults(
        &self,
    ) -> Result<Option<MonitoringDefaults>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.monitoring_defaults.clone())
    }

    async fn set_monitoring_defaults(
        &self,
        defaults: &MonitoringDefaults,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.monitoring_defaults = Some(defaults.clone());
        Ok(())
    }
}
