//! Concrete appliers for the job lifecycle intents.
//!
//! Each job event increments the per-`(job_type, tenant)` counter for
//! its lifecycle state in the job-metrics facade. Tenant and worker
//! identity travel in the record's headers; a missing tenant header
//! resolves to the default tenant.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use flowmesh_protocol::{Intent, JobIntent, JobRecordValue};
use flowmesh_state::{JobMetricsKey, JobMetricsState};

use crate::appliers::{EventApplier, EventAppliers};
use crate::error::EngineResult;

const TENANT_HEADER: &str = "tenantId";
const WORKER_HEADER: &str = "worker";
const DEFAULT_TENANT: &str = "<default>";

/// Millisecond timestamp source, injectable for deterministic tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall-clock milliseconds since the unix epoch.
pub fn wall_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    })
}

fn metrics_key(value: &JobRecordValue) -> JobMetricsKey {
    let tenant = value
        .headers
        .get(TENANT_HEADER)
        .map(String::as_str)
        .unwrap_or(DEFAULT_TENANT);
    JobMetricsKey::new(value.job_type.clone(), tenant)
}

/// Increments the job-type counter for one lifecycle state.
struct JobTypeCounterApplier {
    metrics: Arc<dyn JobMetricsState>,
    state: JobIntent,
    clock: Clock,
}

impl EventApplier for JobTypeCounterApplier {
    fn apply(&self, _key: u64, value: &JobRecordValue) -> EngineResult<()> {
        self.metrics
            .increment_job_type_counter(&metrics_key(value), self.state, (self.clock)())?;
        Ok(())
    }
}

/// Version 2 of the terminal-state appliers: additionally attributes
/// the outcome to the worker named in the record's headers. Records
/// without a worker header count at job-type level only, as before.
struct WorkerAttributedApplier {
    metrics: Arc<dyn JobMetricsState>,
    state: JobIntent,
    clock: Clock,
}

impl EventApplier for WorkerAttributedApplier {
    fn apply(&self, _key: u64, value: &JobRecordValue) -> EngineResult<()> {
        let key = metrics_key(value);
        let timestamp = (self.clock)();
        self.metrics
            .increment_job_type_counter(&key, self.state, timestamp)?;
        if let Some(worker) = value.headers.get(WORKER_HEADER) {
            self.metrics
                .increment_worker_counter(&key, worker, self.state, timestamp)?;
        }
        Ok(())
    }
}

/// Build the job applier registry in its fixed registration order.
///
/// Every lifecycle state registers at version 1. The terminal states
/// COMPLETED and FAILED additionally register at version 2 with
/// worker attribution; MIGRATED is an explicit no-op since migration
/// events carry no metrics effect.
pub fn register_job_appliers(
    metrics: Arc<dyn JobMetricsState>,
    clock: Clock,
) -> EngineResult<EventAppliers> {
    let mut registry = EventAppliers::new();

    for state in JobIntent::ALL {
        if state == JobIntent::Migrated {
            registry.register_noop(Intent::Job(state), 1)?;
            continue;
        }
        registry.register(
            Intent::Job(state),
            1,
            Box::new(JobTypeCounterApplier {
                metrics: Arc::clone(&metrics),
                state,
                clock: Arc::clone(&clock),
            }),
        )?;
    }

    for state in [JobIntent::Completed, JobIntent::Failed] {
        registry.register(
            Intent::Job(state),
            2,
            Box::new(WorkerAttributedApplier {
                metrics: Arc::clone(&metrics),
                state,
                clock: Arc::clone(&clock),
            }),
        )?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmesh_state::{DbJobMetricsState, StateStore};
    use std::collections::BTreeMap;

    fn fixed_clock(millis: i64) -> Clock {
        Arc::new(move || millis)
    }

    fn metrics_state() -> Arc<dyn JobMetricsState> {
        let store = StateStore::open_in_memory().unwrap();
        Arc::new(DbJobMetricsState::new(store))
    }

    fn record_value(headers: &[(&str, &str)]) -> JobRecordValue {
        JobRecordValue {
            job_type: "payment".to_string(),
            lock_time: 10_000,
            retries: 3,
            payload: None,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn registry_shape_is_pinned() {
        let registry = register_job_appliers(metrics_state(), fixed_clock(0)).unwrap();

        let mut expected: Vec<(Intent, u32)> =
            JobIntent::ALL.iter().map(|s| (Intent::Job(*s), 1)).collect();
        expected.push((Intent::Job(JobIntent::Completed), 2));
        expected.push((Intent::Job(JobIntent::Failed), 2));
        expected.sort();

        assert_eq!(registry.registered_appliers(), expected);
        assert_eq!(
            registry.get_latest_version(Intent::Job(JobIntent::Completed)),
            Some(2)
        );
        assert_eq!(
            registry.get_latest_version(Intent::Job(JobIntent::Created)),
            Some(1)
        );
    }

    #[test]
    fn created_event_increments_job_type_counter() {
        let metrics = metrics_state();
        let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(42)).unwrap();

        registry
            .apply_state(
                7,
                Intent::Job(JobIntent::Created),
                &record_value(&[("tenantId", "tenant-a")]),
                1,
            )
            .unwrap();

        let value = metrics
            .get_job_metrics(&JobMetricsKey::new("payment", "tenant-a"))
            .unwrap()
            .unwrap();
        let slot = value.job_type_metrics[JobIntent::Created.index()];
        assert_eq!(slot.count, 1);
        assert_eq!(slot.last_updated_at, 42);
    }

    #[test]
    fn missing_tenant_header_resolves_to_default_tenant() {
        let metrics = metrics_state();
        let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(0)).unwrap();

        registry
            .apply_state(7, Intent::Job(JobIntent::Created), &record_value(&[]), 1)
            .unwrap();

        assert!(metrics
            .exists(&JobMetricsKey::new("payment", "<default>"))
            .unwrap());
    }

    #[test]
    fn completed_v2_attributes_the_worker() {
        let metrics = metrics_state();
        let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(5)).unwrap();
        let value = record_value(&[("tenantId", "tenant-a"), ("worker", "worker-1")]);

        registry
            .apply_state(7, Intent::Job(JobIntent::Completed), &value, 2)
            .unwrap();

        let stored = metrics
            .get_job_metrics(&JobMetricsKey::new("payment", "tenant-a"))
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.job_type_metrics[JobIntent::Completed.index()].count,
            1
        );
        assert_eq!(stored.workers.len(), 1);
        assert_eq!(stored.workers[0].worker_name, "worker-1");
        assert_eq!(
            stored.workers[0].metrics[JobIntent::Completed.index()].count,
            1
        );
    }

    #[test]
    fn completed_v1_ignores_the_worker_header() {
        let metrics = metrics_state();
        let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(5)).unwrap();
        let value = record_value(&[("worker", "worker-1")]);

        registry
            .apply_state(7, Intent::Job(JobIntent::Completed), &value, 1)
            .unwrap();

        let stored = metrics
            .get_job_metrics(&JobMetricsKey::new("payment", "<default>"))
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.job_type_metrics[JobIntent::Completed.index()].count,
            1
        );
        assert!(stored.workers.is_empty());
    }

    #[test]
    fn migrated_event_has_no_metrics_effect() {
        let metrics = metrics_state();
        let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(0)).unwrap();

        registry
            .apply_state(7, Intent::Job(JobIntent::Migrated), &record_value(&[]), 1)
            .unwrap();

        assert!(!metrics
            .exists(&JobMetricsKey::new("payment", "<default>"))
            .unwrap());
    }

    #[test]
    fn replay_is_deterministic_across_stores() {
        let events = [
            (JobIntent::Created, 1_u32),
            (JobIntent::Completed, 2),
            (JobIntent::Created, 1),
            (JobIntent::Failed, 2),
        ];
        let value = record_value(&[("tenantId", "tenant-a"), ("worker", "w")]);

        let mut results = Vec::new();
        for _ in 0..2 {
            let metrics = metrics_state();
            let registry = register_job_appliers(Arc::clone(&metrics), fixed_clock(9)).unwrap();
            for (i, (intent, version)) in events.iter().enumerate() {
                registry
                    .apply_state(i as u64, Intent::Job(*intent), &value, *version)
                    .unwrap();
            }
            results.push(
                metrics
                    .get_job_metrics(&JobMetricsKey::new("payment", "tenant-a"))
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(results[0], results[1]);
    }
}
