//! Subscription state machine and credit bookkeeping.
//!
//! One `SubscriptionCore` per logical subscription. Its mutex guards
//! the lifecycle phase, the broker-assigned subscriber key, the
//! freed-credit counter, and the pollable-mode buffer; transport
//! traffic always happens outside the lock.
//!
//! Credit flow: the broker grants `capacity` credits at open and pushes
//! at most that many unacknowledged jobs (over-delivery is tolerated,
//! never refused). Each terminal outcome frees one credit locally;
//! once the freed count reaches the replenishment threshold the whole
//! batch is sent back in a single increase request. Sub-threshold
//! credits accumulate, a closing subscription discards them.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use flowmesh_protocol::SubscribedRecord;
use tracing::debug;

use crate::config::{ClientConfig, REPLENISHMENT_THRESHOLD};
use crate::error::{ClientError, ClientResult};
use crate::job::{ActivatedJob, JobHandler};

/// Lifecycle phase of a subscription.
///
/// `Open → Opening` happens on transport interruption (transparent
/// reopen under a fresh subscriber key); `Opening → Closed` when the
/// reopen budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Immutable open parameters, reused verbatim on every reopen.
#[derive(Debug, Clone)]
pub(crate) struct SubscriptionSpec {
    pub job_type: String,
    pub lock_owner: String,
    pub lock_duration_ms: u64,
    pub capacity: u32,
}

/// How received jobs reach their handler.
#[derive(Clone)]
pub(crate) enum DispatchMode {
    /// Jobs go to the shared worker pool, handler supplied at build.
    Managed(JobHandler),
    /// Jobs buffer until the caller polls.
    Pollable,
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Managed(_) => f.write_str("Managed(..)"),
            DispatchMode::Pollable => f.write_str("Pollable"),
        }
    }
}

struct CoreInner {
    phase: SubscriptionState,
    subscriber_key: u64,
    freed_credits: u32,
    buffered: VecDeque<SubscribedRecord>,
}

pub(crate) struct SubscriptionCore {
    pub spec: SubscriptionSpec,
    pub partition_id: u32,
    pub mode: DispatchMode,
    threshold: u32,
    inner: Mutex<CoreInner>,
}

fn replenishment_threshold(capacity: u32) -> u32 {
    let threshold = (f64::from(capacity) * REPLENISHMENT_THRESHOLD).ceil() as u32;
    threshold.max(1)
}

impl SubscriptionCore {
    pub fn new(spec: SubscriptionSpec, partition_id: u32, mode: DispatchMode) -> Self {
        let threshold = replenishment_threshold(spec.capacity);
        Self {
            spec,
            partition_id,
            mode,
            threshold,
            inner: Mutex::new(CoreInner {
                phase: SubscriptionState::Opening,
                subscriber_key: 0,
                freed_credits: 0,
                buffered: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoreInner> {
        // Held only for field updates; a poisoned lock means a panic
        // mid-update, which the test harness surfaces on its own.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.lock().phase
    }

    pub fn subscriber_key(&self) -> u64 {
        self.lock().subscriber_key
    }

    /// Transition into OPEN under a (possibly new) subscriber key.
    /// Resets the freed-credit counter; the broker granted a fresh
    /// full capacity with the open response.
    pub fn mark_open(&self, subscriber_key: u64) {
        let mut inner = self.lock();
        inner.phase = SubscriptionState::Open;
        inner.subscriber_key = subscriber_key;
        inner.freed_credits = 0;
        debug!(subscriber_key, job_type = %self.spec.job_type, "subscription open");
    }

    /// OPEN → OPENING on channel interruption. Returns the stale
    /// subscriber key when the transition applies.
    pub fn begin_reopen(&self) -> Option<u64> {
        let mut inner = self.lock();
        if inner.phase != SubscriptionState::Open {
            return None;
        }
        inner.phase = SubscriptionState::Opening;
        inner.freed_credits = 0;
        Some(inner.subscriber_key)
    }

    /// Start closing. Returns the subscriber key to deregister, or
    /// `None` when the subscription is already closing or closed.
    pub fn begin_close(&self) -> Option<u64> {
        let mut inner = self.lock();
        match inner.phase {
            SubscriptionState::Closing | SubscriptionState::Closed => None,
            _ => {
                inner.phase = SubscriptionState::Closing;
                Some(inner.subscriber_key)
            }
        }
    }

    /// Terminal transition. Pending credits and buffered jobs are
    /// discarded.
    pub fn mark_closed(&self) {
        let mut inner = self.lock();
        inner.phase = SubscriptionState::Closed;
        inner.freed_credits = 0;
        inner.buffered.clear();
    }

    /// Account one freed credit. Returns `Some((subscriber_key, n))`
    /// when the accumulated amount reached the threshold and must be
    /// sent to the broker now; the counter is drained in the same
    /// step so exactly one request carries the batch.
    pub fn credit_freed(&self) -> Option<(u64, u32)> {
        let mut inner = self.lock();
        inner.freed_credits += 1;
        if inner.phase == SubscriptionState::Open && inner.freed_credits >= self.threshold {
            let batch = inner.freed_credits;
            inner.freed_credits = 0;
            Some((inner.subscriber_key, batch))
        } else {
            None
        }
    }

    /// Put a drained batch back after a failed replenishment send.
    /// Credits are never dropped while the subscription lives.
    pub fn restore_credits(&self, credits: u32) {
        let mut inner = self.lock();
        if inner.phase == SubscriptionState::Open {
            inner.freed_credits += credits;
        }
    }

    /// Buffer a job for pollable consumption.
    pub fn buffer(&self, record: SubscribedRecord) {
        self.lock().buffered.push_back(record);
    }

    /// Take everything currently buffered.
    pub fn drain_buffered(&self) -> Vec<SubscribedRecord> {
        self.lock().buffered.drain(..).collect()
    }
}

/// Builder for a job subscription. Validation happens at open time,
/// before any network traffic.
#[derive(Default)]
pub struct JobSubscriptionBuilder {
    job_type: Option<String>,
    lock_owner: Option<String>,
    lock_time_ms: Option<u64>,
    fetch_size: Option<u32>,
    handler: Option<JobHandler>,
    pollable: bool,
}

impl JobSubscriptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Lock owner; defaults from the client configuration.
    pub fn lock_owner(mut self, lock_owner: impl Into<String>) -> Self {
        self.lock_owner = Some(lock_owner.into());
        self
    }

    pub fn lock_time(mut self, lock_time: Duration) -> Self {
        self.lock_time_ms = Some(lock_time.as_millis() as u64);
        self
    }

    pub fn lock_time_millis(mut self, millis: u64) -> Self {
        self.lock_time_ms = Some(millis);
        self
    }

    /// Subscription capacity; defaults from the client configuration.
    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ActivatedJob) -> anyhow::Result<Option<flowmesh_protocol::PayloadValue>>
            + Send
            + Sync
            + 'static,
    {
        self.handler = Some(std::sync::Arc::new(handler));
        self
    }

    /// Switch to pollable mode: no handler at build time, the caller
    /// drives execution through `poll`.
    pub fn pollable(mut self) -> Self {
        self.pollable = true;
        self
    }

    pub(crate) fn validate(
        self,
        config: &ClientConfig,
    ) -> ClientResult<(SubscriptionSpec, DispatchMode)> {
        let job_type = self
            .job_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::Validation("jobType must not be null".to_string()))?;

        let mode = if self.pollable {
            DispatchMode::Pollable
        } else {
            let handler = self
                .handler
                .ok_or_else(|| ClientError::Validation("handler must not be null".to_string()))?;
            DispatchMode::Managed(handler)
        };

        let lock_duration_ms = self.lock_time_ms.unwrap_or(0);
        if lock_duration_ms == 0 {
            return Err(ClientError::Validation(
                "lockTime must be greater than 0".to_string(),
            ));
        }

        let spec = SubscriptionSpec {
            job_type,
            lock_owner: self
                .lock_owner
                .unwrap_or_else(|| config.default_lock_owner.clone()),
            lock_duration_ms,
            capacity: self.fetch_size.unwrap_or(config.default_fetch_size),
        };
        Ok((spec, mode))
    }
}
