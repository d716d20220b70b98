//! Recording transport and async test helpers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use flowmesh_protocol::{
    AddJobSubscription, CommandResponse, ControlRequest, ControlRequestBody, ControlResponse,
    ExecuteCommandRequest, IncreaseJobSubscriptionCredits, JobCommandState, JobIntent,
    JobRecordValue, RecordType, RemoveJobSubscription, SubscribedRecord, SubscriptionType,
    ValueType,
};

use crate::error::ClientResult;
use crate::transport::BrokerTransport;

/// In-memory transport that records every request and answers with
/// scripted responses, falling back to sensible defaults.
pub(crate) struct RecordingTransport {
    control: Mutex<Vec<ControlRequest>>,
    commands: Mutex<Vec<ExecuteCommandRequest>>,
    control_script: Mutex<VecDeque<ClientResult<ControlResponse>>>,
    command_script: Mutex<VecDeque<ClientResult<CommandResponse>>>,
    next_subscriber_key: AtomicU64,
    hang_control: AtomicBool,
    refreshes: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            control: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            control_script: Mutex::new(VecDeque::new()),
            command_script: Mutex::new(VecDeque::new()),
            next_subscriber_key: AtomicU64::new(100),
            hang_control: AtomicBool::new(false),
            refreshes: AtomicU32::new(0),
        })
    }

    /// Queue a response for the next control request.
    pub fn script_control_response(&self, response: ClientResult<ControlResponse>) {
        self.control_script.lock().unwrap().push_back(response);
    }

    /// Queue a response for the next command request.
    pub fn script_command_response(&self, response: ClientResult<CommandResponse>) {
        self.command_script.lock().unwrap().push_back(response);
    }

    /// Make every control request hang (for timeout tests).
    pub fn hang_control(&self) {
        self.hang_control.store(true, Ordering::SeqCst);
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        self.control.lock().unwrap().clone()
    }

    pub fn command_requests(&self) -> Vec<ExecuteCommandRequest> {
        self.commands.lock().unwrap().clone()
    }

    pub fn add_requests(&self) -> Vec<AddJobSubscription> {
        self.control_requests()
            .into_iter()
            .filter_map(|r| match r.body {
                ControlRequestBody::AddJobSubscription(add) => Some(add),
                _ => None,
            })
            .collect()
    }

    pub fn remove_requests(&self) -> Vec<RemoveJobSubscription> {
        self.control_requests()
            .into_iter()
            .filter_map(|r| match r.body {
                ControlRequestBody::RemoveJobSubscription(remove) => Some(remove),
                _ => None,
            })
            .collect()
    }

    pub fn topology_refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn increase_requests(&self) -> Vec<IncreaseJobSubscriptionCredits> {
        self.control_requests()
            .into_iter()
            .filter_map(|r| match r.body {
                ControlRequestBody::IncreaseJobSubscriptionCredits(inc) => Some(inc),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for RecordingTransport {
    async fn partition_for_job_type(&self, _job_type: &str) -> ClientResult<u32> {
        Ok(1)
    }

    async fn refresh_topology(&self) -> ClientResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_control(&self, request: ControlRequest) -> ClientResult<ControlResponse> {
        if self.hang_control.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.control.lock().unwrap().push(request.clone());

        if let Some(scripted) = self.control_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(match request.body {
            ControlRequestBody::AddJobSubscription(_) => ControlResponse::SubscriptionOpened {
                subscriber_key: self.next_subscriber_key.fetch_add(1, Ordering::SeqCst),
            },
            _ => ControlResponse::Acknowledged,
        })
    }

    async fn send_command(&self, request: ExecuteCommandRequest) -> ClientResult<CommandResponse> {
        let state = request.command.state;
        self.commands.lock().unwrap().push(request);

        if let Some(scripted) = self.command_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(CommandResponse::Ok {
            intent: match state {
                JobCommandState::Complete => JobIntent::Completed,
                JobCommandState::Fail => JobIntent::Failed,
            },
        })
    }
}

/// A pushed job record for the given subscriber.
pub(crate) fn record_for(subscriber_key: u64, job_key: u64) -> SubscribedRecord {
    SubscribedRecord {
        partition_id: 1,
        key: job_key,
        position: job_key * 10,
        record_type: RecordType::Event,
        value_type: ValueType::Job,
        intent: JobIntent::Created,
        subscriber_key,
        subscription_type: SubscriptionType::JobSubscription,
        value: JobRecordValue {
            job_type: "bar".to_string(),
            lock_time: 10_000,
            retries: 3,
            payload: None,
            headers: BTreeMap::new(),
        },
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub(crate) async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within deadline");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
