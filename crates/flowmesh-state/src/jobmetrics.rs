//! Job metrics state facade.
//!
//! The reference instance of the typed-facade pattern: strongly-typed
//! accessors over the `JobMetrics` column family, per-lifecycle-state
//! counters at job-type and worker granularity, and a singleton
//! monitoring aggregate tracking storage growth.
//!
//! The monitoring aggregate is deliberately approximate: it grows by
//! the serialized value length once per new composite key and is never
//! revisited when an existing value grows (e.g. when more workers are
//! added). Cheap storage estimate, not an exact figure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use flowmesh_protocol::JobIntent;

use crate::error::StateResult;
use crate::families::ColumnFamilyId;
use crate::key::{decode_composite, encode_composite};
use crate::stats::CountedTransaction;
use crate::store::StateStore;

/// Key of the monitoring singleton within the `Monitoring` family.
const MONITORING_KEY: &[u8] = b"job_metrics\x00";

/// Composite key of a job metrics entry: `(job_type, tenant_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMetricsKey {
    pub job_type: String,
    pub tenant_id: String,
}

impl JobMetricsKey {
    pub fn new(job_type: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            tenant_id: tenant_id.into(),
        }
    }

    pub fn encode(&self) -> StateResult<Vec<u8>> {
        encode_composite(&[&self.job_type, &self.tenant_id])
    }
}

/// One counter slot: how often a state was reached, and when last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMetric {
    pub count: u32,
    pub last_updated_at: i64,
}

impl StatusMetric {
    fn increment(&mut self, timestamp: i64) {
        self.count += 1;
        self.last_updated_at = timestamp;
    }
}

/// Per-worker counter array within one job metrics value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWorkerCounters {
    pub worker_name: String,
    pub metrics: Vec<StatusMetric>,
}

impl JobWorkerCounters {
    fn new(worker_name: &str) -> Self {
        Self {
            worker_name: worker_name.to_string(),
            metrics: vec![StatusMetric::default(); JobIntent::COUNT],
        }
    }
}

/// Counters for one `(job_type, tenant_id)` key: a fixed array at
/// job-type level plus a dynamic set of per-worker arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetricsValue {
    pub job_type_metrics: Vec<StatusMetric>,
    pub workers: Vec<JobWorkerCounters>,
}

impl Default for JobMetricsValue {
    fn default() -> Self {
        Self {
            job_type_metrics: vec![StatusMetric::default(); JobIntent::COUNT],
            workers: Vec::new(),
        }
    }
}

impl JobMetricsValue {
    fn increment_job_type(&mut self, state: JobIntent, timestamp: i64) {
        self.job_type_metrics[state.index()].increment(timestamp);
    }

    /// Linear scan over current workers; per-key worker cardinality is
    /// small, so O(n) lookup beats maintaining an index.
    fn increment_worker(&mut self, worker_name: &str, state: JobIntent, timestamp: i64) {
        let pos = match self
            .workers
            .iter()
            .position(|w| w.worker_name == worker_name)
        {
            Some(pos) => pos,
            None => {
                self.workers.push(JobWorkerCounters::new(worker_name));
                self.workers.len() - 1
            }
        };
        self.workers[pos].metrics[state.index()].increment(timestamp);
    }
}

/// Storage-growth aggregate for the metrics family. Updated once per
/// new composite key, at first insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringValue {
    pub total_size_bytes: u64,
}

/// Typed accessors over the job metrics column family.
///
/// Implementations are selected at construction time; call sites never
/// branch on whether metrics collection is enabled.
pub trait JobMetricsState: Send + Sync {
    fn get_job_metrics(&self, key: &JobMetricsKey) -> StateResult<Option<JobMetricsValue>>;

    fn exists(&self, key: &JobMetricsKey) -> StateResult<bool>;

    fn increment_job_type_counter(
        &self,
        key: &JobMetricsKey,
        state: JobIntent,
        timestamp: i64,
    ) -> StateResult<()>;

    fn increment_worker_counter(
        &self,
        key: &JobMetricsKey,
        worker_name: &str,
        state: JobIntent,
        timestamp: i64,
    ) -> StateResult<()>;

    fn get_monitoring_data(&self) -> StateResult<Option<MonitoringValue>>;

    /// Read-only diagnostic traversal in key order. The visitor
    /// receives the decoded composite key as `job_type:tenant_id`.
    fn for_each_job_metrics(
        &self,
        visitor: &mut dyn FnMut(&str, &JobMetricsValue),
    ) -> StateResult<()>;

    /// Delete every metrics entry and clear the monitoring singleton.
    ///
    /// Runs in a single transaction; the whole reset commits or none
    /// of it does.
    fn reset_all_metrics(&self) -> StateResult<()>;
}

/// Construct the configured facade variant.
pub fn job_metrics_state(store: StateStore, enabled: bool) -> Arc<dyn JobMetricsState> {
    if enabled {
        Arc::new(DbJobMetricsState::new(store))
    } else {
        Arc::new(NoopJobMetricsState)
    }
}

/// The store-backed facade.
pub struct DbJobMetricsState {
    store: StateStore,
}

impl DbJobMetricsState {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Shared create-or-update path for both increment operations.
    ///
    /// A single read-modify-write inside one transaction; on first
    /// creation the serialized length is registered with the
    /// monitoring aggregate, exactly once.
    fn mutate(&self, key: &JobMetricsKey, f: impl FnOnce(&mut JobMetricsValue)) -> StateResult<()> {
        let encoded = key.encode()?;
        self.store.transaction(|txn| {
            match txn.get::<JobMetricsValue>(ColumnFamilyId::JobMetrics, &encoded)? {
                Some(mut value) => {
                    f(&mut value);
                    txn.update(ColumnFamilyId::JobMetrics, &encoded, &value)
                }
                None => {
                    let mut value = JobMetricsValue::default();
                    f(&mut value);

                    let serialized_len = serde_json::to_vec(&value)
                        .map_err(|e| crate::error::StateError::Serialize(e.to_string()))?
                        .len() as u64;

                    let mut counted = CountedTransaction::new(txn);
                    counted.insert(ColumnFamilyId::JobMetrics, &encoded, &value)?;

                    let mut monitoring: MonitoringValue = counted
                        .get(ColumnFamilyId::Monitoring, MONITORING_KEY)?
                        .unwrap_or_default();
                    monitoring.total_size_bytes += serialized_len;
                    counted.upsert(ColumnFamilyId::Monitoring, MONITORING_KEY, &monitoring)?;

                    debug!(
                        job_type = %key.job_type,
                        tenant_id = %key.tenant_id,
                        serialized_len,
                        "job metrics entry created"
                    );
                    Ok(())
                }
            }
        })
    }
}

impl JobMetricsState for DbJobMetricsState {
    fn get_job_metrics(&self, key: &JobMetricsKey) -> StateResult<Option<JobMetricsValue>> {
        let encoded = key.encode()?;
        self.store
            .snapshot(|snap| snap.get(ColumnFamilyId::JobMetrics, &encoded))
    }

    fn exists(&self, key: &JobMetricsKey) -> StateResult<bool> {
        let encoded = key.encode()?;
        self.store
            .snapshot(|snap| snap.exists(ColumnFamilyId::JobMetrics, &encoded))
    }

    fn increment_job_type_counter(
        &self,
        key: &JobMetricsKey,
        state: JobIntent,
        timestamp: i64,
    ) -> StateResult<()> {
        self.mutate(key, |value| value.increment_job_type(state, timestamp))
    }

    fn increment_worker_counter(
        &self,
        key: &JobMetricsKey,
        worker_name: &str,
        state: JobIntent,
        timestamp: i64,
    ) -> StateResult<()> {
        self.mutate(key, |value| {
            value.increment_worker(worker_name, state, timestamp)
        })
    }

    fn get_monitoring_data(&self) -> StateResult<Option<MonitoringValue>> {
        self.store
            .snapshot(|snap| snap.get(ColumnFamilyId::Monitoring, MONITORING_KEY))
    }

    fn for_each_job_metrics(
        &self,
        visitor: &mut dyn FnMut(&str, &JobMetricsValue),
    ) -> StateResult<()> {
        self.store.snapshot(|snap| {
            snap.for_each(
                ColumnFamilyId::JobMetrics,
                |key, value: JobMetricsValue| {
                    let parts = decode_composite(key)?;
                    visitor(&parts.join(":"), &value);
                    Ok(())
                },
            )
        })
    }

    fn reset_all_metrics(&self) -> StateResult<()> {
        self.store.transaction(|txn| {
            let mut keys = Vec::new();
            txn.for_each(ColumnFamilyId::JobMetrics, |key, _: JobMetricsValue| {
                keys.push(key.to_vec());
                Ok(())
            })?;

            let deleted = keys.len();
            let mut counted = CountedTransaction::new(txn);
            for key in &keys {
                counted.delete_existing(ColumnFamilyId::JobMetrics, key)?;
            }
            counted.delete_if_exists(ColumnFamilyId::Monitoring, MONITORING_KEY)?;

            debug!(deleted, "job metrics reset");
            Ok(())
        })
    }
}

/// The disabled variant: every mutator is a no-op, every reader sees
/// an empty store.
pub struct NoopJobMetricsState;

impl JobMetricsState for NoopJobMetricsState {
    fn get_job_metrics(&self, _key: &JobMetricsKey) -> StateResult<Option<JobMetricsValue>> {
        Ok(None)
    }

    fn exists(&self, _key: &JobMetricsKey) -> StateResult<bool> {
        Ok(false)
    }

    fn increment_job_type_counter(
        &self,
        _key: &JobMetricsKey,
        _state: JobIntent,
        _timestamp: i64,
    ) -> StateResult<()> {
        Ok(())
    }

    fn increment_worker_counter(
        &self,
        _key: &JobMetricsKey,
        _worker_name: &str,
        _state: JobIntent,
        _timestamp: i64,
    ) -> StateResult<()> {
        Ok(())
    }

    fn get_monitoring_data(&self) -> StateResult<Option<MonitoringValue>> {
        Ok(None)
    }

    fn for_each_job_metrics(
        &self,
        _visitor: &mut dyn FnMut(&str, &JobMetricsValue),
    ) -> StateResult<()> {
        Ok(())
    }

    fn reset_all_metrics(&self) -> StateResult<()> {
        Ok(())
    }
}
