//! Subscription manager — event routing, job execution, reopen.
//!
//! One manager per broker connection. A single event task routes
//! pushed records to their subscription by subscriber key; a shared
//! pool of execution workers runs handlers (via `spawn_blocking`, so
//! blocking handlers never stall the runtime) and acknowledges each
//! job with a COMPLETE or FAIL command. Excess jobs queue in the work
//! channel; nothing is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flowmesh_protocol::{
    AddJobSubscription, CommandResponse, ControlRequest, ControlRequestBody, ControlResponse,
    ExecuteCommandRequest, IncreaseJobSubscriptionCredits, JobCommand, JobCommandState,
    PayloadValue, RemoveJobSubscription, SubscribedRecord,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::job::ActivatedJob;
use crate::subscription::{
    DispatchMode, JobSubscriptionBuilder, SubscriptionCore, SubscriptionState,
};
use crate::transport::{BrokerTransport, TransportEvent};

struct WorkItem {
    core: Arc<SubscriptionCore>,
    record: SubscribedRecord,
}

struct Shared {
    transport: Arc<dyn BrokerTransport>,
    config: ClientConfig,
    /// Active subscriptions by broker-assigned subscriber key. A
    /// reopening subscription leaves the map until it holds its new
    /// key, so stale-key records fall through and are dropped.
    subscriptions: RwLock<HashMap<u64, Arc<SubscriptionCore>>>,
    work_tx: mpsc::UnboundedSender<WorkItem>,
    /// When the last timeout-triggered topology refresh ran.
    last_topology_refresh: StdMutex<Option<tokio::time::Instant>>,
}

/// Manages all job subscriptions over one broker transport.
pub struct JobSubscriptionManager {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    event_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl JobSubscriptionManager {
    /// Spawn the event router and the execution worker pool.
    ///
    /// `events` is the broker-push side of the transport; the
    /// request/response side arrives as `transport`.
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: ClientConfig,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            transport,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            work_tx,
            last_topology_refresh: StdMutex::new(None),
        });

        let event_handle = tokio::spawn(run_event_loop(
            Arc::clone(&shared),
            events,
            shutdown_rx.clone(),
        ));

        let work_rx = Arc::new(Mutex::new(work_rx));
        let worker_handles = (0..shared.config.num_execution_workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    Arc::clone(&shared),
                    Arc::clone(&work_rx),
                    shutdown_rx.clone(),
                    worker_id,
                ))
            })
            .collect();

        Self {
            shared,
            shutdown_tx,
            event_handle,
            worker_handles,
        }
    }

    /// Validate and open a subscription. No network traffic happens
    /// before validation passes.
    pub async fn open_subscription(
        &self,
        builder: JobSubscriptionBuilder,
    ) -> ClientResult<JobSubscription> {
        let (spec, mode) = builder.validate(&self.shared.config)?;

        let partition_id = request_with_refresh(
            &self.shared,
            self.shared.transport.partition_for_job_type(&spec.job_type),
        )
        .await
        .map_err(|e| ClientError::SubscriptionOpen(e.to_string()))?;

        let core = Arc::new(SubscriptionCore::new(spec, partition_id, mode));
        let subscriber_key = open_on_broker(&self.shared, &core).await?;
        core.mark_open(subscriber_key);
        self.shared
            .subscriptions
            .write()
            .await
            .insert(subscriber_key, Arc::clone(&core));

        info!(
            subscriber_key,
            job_type = %core.spec.job_type,
            capacity = core.spec.capacity,
            "job subscription opened"
        );
        Ok(JobSubscription {
            shared: Arc::clone(&self.shared),
            core,
        })
    }

    /// Close every subscription and stop the background tasks.
    /// In-flight handlers finish; only intake stops.
    pub async fn shutdown(&self) {
        let cores: Vec<Arc<SubscriptionCore>> = self
            .shared
            .subscriptions
            .read()
            .await
            .values()
            .cloned()
            .collect();
        for core in cores {
            close_subscription(&self.shared, &core).await;
        }
        let _ = self.shutdown_tx.send(true);
        debug!("subscription manager shut down");
    }
}

impl Drop for JobSubscriptionManager {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.event_handle.abort();
        for handle in &self.worker_handles {
            handle.abort();
        }
    }
}

/// A handle to one open subscription.
pub struct JobSubscription {
    shared: Arc<Shared>,
    core: Arc<SubscriptionCore>,
}

impl JobSubscription {
    pub fn subscriber_key(&self) -> u64 {
        self.core.subscriber_key()
    }

    pub fn state(&self) -> SubscriptionState {
        self.core.state()
    }

    /// Close the subscription. Idempotent; the client side is CLOSED
    /// when this returns, whatever the broker answered.
    pub async fn close(&self) -> ClientResult<()> {
        close_subscription(&self.shared, &self.core).await;
        Ok(())
    }

    /// Pollable mode: run `handler` over every currently buffered job
    /// and acknowledge each one. Returns the number of jobs handled,
    /// or the first acknowledgement error — rejections surface here,
    /// to the immediate caller. Every drained job is acknowledged and
    /// its credit freed before the error returns.
    pub async fn poll<F>(&self, handler: F) -> ClientResult<usize>
    where
        F: Fn(&ActivatedJob) -> anyhow::Result<Option<PayloadValue>>,
    {
        if !matches!(self.core.mode, DispatchMode::Pollable) {
            return Err(ClientError::Validation(
                "subscription is not pollable".to_string(),
            ));
        }
        if self.core.state() == SubscriptionState::Closed {
            return Err(ClientError::Closed);
        }

        let records = self.core.drain_buffered();
        let handled = records.len();
        let mut first_error = None;
        for record in records {
            let job = ActivatedJob::from_record(&record);
            let outcome = handler(&job);
            if let Err(e) = acknowledge(&self.shared, &self.core, &record, outcome).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }
}

async fn close_subscription(shared: &Arc<Shared>, core: &Arc<SubscriptionCore>) {
    let Some(subscriber_key) = core.begin_close() else {
        return;
    };
    shared.subscriptions.write().await.remove(&subscriber_key);

    let request = ControlRequest {
        partition_id: core.partition_id,
        body: ControlRequestBody::RemoveJobSubscription(RemoveJobSubscription { subscriber_key }),
    };
    let result = request_with_refresh(shared, shared.transport.send_control(request)).await;
    if let Err(e) = result {
        // Client-side close wins regardless.
        debug!(subscriber_key, error = %e, "broker did not acknowledge close");
    }
    core.mark_closed();
    info!(subscriber_key, job_type = %core.spec.job_type, "job subscription closed");
}

/// Send ADD_JOB_SUBSCRIPTION with the subscription's open parameters.
async fn open_on_broker(shared: &Arc<Shared>, core: &Arc<SubscriptionCore>) -> ClientResult<u64> {
    let request = ControlRequest {
        partition_id: core.partition_id,
        body: ControlRequestBody::AddJobSubscription(AddJobSubscription {
            job_type: core.spec.job_type.clone(),
            lock_owner: core.spec.lock_owner.clone(),
            lock_duration: core.spec.lock_duration_ms,
            credits: core.spec.capacity,
        }),
    };

    let response = request_with_refresh(shared, shared.transport.send_control(request))
        .await
        .map_err(|e| ClientError::SubscriptionOpen(e.to_string()))?;

    match response {
        ControlResponse::SubscriptionOpened { subscriber_key } => Ok(subscriber_key),
        other => Err(ClientError::SubscriptionOpen(format!(
            "unexpected broker response: {other:?}"
        ))),
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Record(record)) => route_record(&shared, record).await,
                Some(TransportEvent::ChannelClosed) => on_channel_closed(&shared).await,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("event loop stopped");
}

async fn route_record(shared: &Arc<Shared>, record: SubscribedRecord) {
    let core = {
        let subscriptions = shared.subscriptions.read().await;
        subscriptions.get(&record.subscriber_key).cloned()
    };
    let Some(core) = core else {
        // Closed or mid-reopen; the broker will redeliver under the
        // active key.
        debug!(
            subscriber_key = record.subscriber_key,
            key = record.key,
            "record for unknown subscriber dropped"
        );
        return;
    };

    match &core.mode {
        DispatchMode::Managed(_) => {
            // Unbounded queue: over-delivery beyond granted capacity
            // is accepted and waits for a worker.
            let _ = shared.work_tx.send(WorkItem { core, record });
        }
        DispatchMode::Pollable => core.buffer(record),
    }
}

/// Transport interruption: move every open subscription back to
/// OPENING and reopen it under a fresh subscriber key.
async fn on_channel_closed(shared: &Arc<Shared>) {
    let cores: Vec<Arc<SubscriptionCore>> = shared
        .subscriptions
        .read()
        .await
        .values()
        .cloned()
        .collect();

    warn!(subscriptions = cores.len(), "broker channel closed");
    for core in cores {
        if let Some(stale_key) = core.begin_reopen() {
            shared.subscriptions.write().await.remove(&stale_key);
            tokio::spawn(reopen(Arc::clone(shared), core));
        }
    }
}

async fn reopen(shared: Arc<Shared>, core: Arc<SubscriptionCore>) {
    for attempt in 1..=shared.config.reopen_attempts.max(1) {
        if core.state() != SubscriptionState::Opening {
            // Closed concurrently; nothing left to restore.
            return;
        }
        match open_on_broker(&shared, &core).await {
            Ok(subscriber_key) => {
                core.mark_open(subscriber_key);
                shared
                    .subscriptions
                    .write()
                    .await
                    .insert(subscriber_key, core);
                info!(subscriber_key, attempt, "subscription reopened");
                return;
            }
            Err(e) => {
                warn!(
                    attempt,
                    job_type = %core.spec.job_type,
                    error = %e,
                    "reopen attempt failed"
                );
                tokio::time::sleep(shared.config.reopen_delay()).await;
            }
        }
    }
    core.mark_closed();
    warn!(job_type = %core.spec.job_type, "reopen budget exhausted, subscription closed");
}

async fn run_worker(
    shared: Arc<Shared>,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                item = rx.recv() => item,
                _ = shutdown.changed() => None,
            }
        };
        let Some(item) = item else { break };
        execute_job(&shared, item).await;
    }
    debug!(worker_id, "execution worker stopped");
}

async fn execute_job(shared: &Arc<Shared>, item: WorkItem) {
    let DispatchMode::Managed(handler) = &item.core.mode else {
        return;
    };
    let handler = Arc::clone(handler);
    let job = ActivatedJob::from_record(&item.record);

    // Handlers may block; keep them off the async workers.
    let outcome = match tokio::task::spawn_blocking(move || handler(&job)).await {
        Ok(outcome) => outcome,
        Err(join_error) => Err(anyhow::anyhow!("job handler panicked: {join_error}")),
    };

    if let Err(e) = acknowledge(shared, &item.core, &item.record, outcome).await {
        // Managed jobs have no caller to hand the error to.
        warn!(job_key = item.record.key, error = %e, "job acknowledgement failed");
    }
}

/// Send the terminal command for one handled job, then free its
/// credit. The credit is freed after the send was attempted, also
/// when the send itself failed. A broker rejection comes back as
/// `ClientError::Rejection`.
async fn acknowledge(
    shared: &Arc<Shared>,
    core: &Arc<SubscriptionCore>,
    record: &SubscribedRecord,
    outcome: anyhow::Result<Option<PayloadValue>>,
) -> ClientResult<()> {
    let command = build_command(core, record, outcome);
    let request = ExecuteCommandRequest {
        partition_id: record.partition_id,
        key: record.key,
        command,
    };
    let command_state = request.command.state;

    let result = request_with_refresh(shared, shared.transport.send_command(request)).await;
    replenish(shared, core).await;

    match result? {
        CommandResponse::Ok { intent } => {
            debug!(job_key = record.key, ?command_state, ?intent, "job acknowledged");
            Ok(())
        }
        CommandResponse::Rejection {
            rejection_type,
            reason,
        } => Err(ClientError::Rejection {
            command: command_state,
            job_key: record.key,
            rejection_type,
            reason,
        }),
    }
}

fn build_command(
    core: &SubscriptionCore,
    record: &SubscribedRecord,
    outcome: anyhow::Result<Option<PayloadValue>>,
) -> JobCommand {
    let fail = |job_type: &str| JobCommand {
        state: JobCommandState::Fail,
        job_type: job_type.to_string(),
        lock_owner: core.spec.lock_owner.clone(),
        payload: None,
    };

    match outcome {
        Ok(maybe_payload) => {
            match maybe_payload
                .map(|p| flowmesh_protocol::encode_payload(&p))
                .transpose()
            {
                Ok(payload) => JobCommand {
                    state: JobCommandState::Complete,
                    job_type: record.value.job_type.clone(),
                    lock_owner: core.spec.lock_owner.clone(),
                    payload,
                },
                Err(e) => {
                    warn!(job_key = record.key, error = %e, "result payload encoding failed");
                    fail(&record.value.job_type)
                }
            }
        }
        Err(e) => {
            debug!(job_key = record.key, error = %e, "job handler failed");
            fail(&record.value.job_type)
        }
    }
}

/// Flush freed credits back to the broker when the threshold is met.
/// A failed send puts the batch back; credits are never lost while
/// the subscription is open.
async fn replenish(shared: &Arc<Shared>, core: &Arc<SubscriptionCore>) {
    let Some((subscriber_key, credits)) = core.credit_freed() else {
        return;
    };
    let request = ControlRequest {
        partition_id: core.partition_id,
        body: ControlRequestBody::IncreaseJobSubscriptionCredits(IncreaseJobSubscriptionCredits {
            subscriber_key,
            credits,
        }),
    };
    let result = request_with_refresh(shared, shared.transport.send_control(request)).await;
    match result {
        Ok(_) => debug!(subscriber_key, credits, "credits replenished"),
        Err(e) => {
            warn!(subscriber_key, credits, error = %e, "credit replenishment failed");
            core.restore_credits(credits);
        }
    }
}

/// Bound a request by the configured timeout. A local timeout kicks
/// off a topology refresh, throttled by the minimum refresh interval.
async fn request_with_refresh<T>(
    shared: &Arc<Shared>,
    future: impl std::future::Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    let duration: Duration = shared.config.request_timeout();
    let result = tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ClientError::Timeout(duration))
        .and_then(|inner| inner);
    if matches!(result, Err(ClientError::Timeout(_))) {
        maybe_refresh_topology(shared);
    }
    result
}

fn maybe_refresh_topology(shared: &Arc<Shared>) {
    {
        let mut last = match shared.last_topology_refresh.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = tokio::time::Instant::now();
        if let Some(previous) = *last {
            if now.duration_since(previous) < shared.config.topology_refresh_interval() {
                debug!("topology refresh throttled");
                return;
            }
        }
        *last = Some(now);
    }
    let transport = Arc::clone(&shared.transport);
    tokio::spawn(async move {
        match transport.refresh_topology().await {
            Ok(()) => debug!("topology refreshed after request timeout"),
            Err(e) => warn!(error = %e, "topology refresh failed"),
        }
    });
}
