//! The broker transport seam.
//!
//! The subscription manager never talks to a socket directly; it
//! drives a `BrokerTransport` for request/response traffic and
//! consumes a stream of `TransportEvent`s for broker-pushed records
//! and channel lifecycle signals. Tests substitute a recording
//! implementation.

use async_trait::async_trait;

use flowmesh_protocol::{
    CommandResponse, ControlRequest, ControlResponse, ExecuteCommandRequest, SubscribedRecord,
};

use crate::error::ClientResult;

/// Something the broker pushed down the channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A record for an open subscription.
    Record(SubscribedRecord),
    /// The underlying channel died; open subscriptions must reopen.
    ChannelClosed,
}

/// Request/response side of the broker connection.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// The partition owning the given job type.
    async fn partition_for_job_type(&self, job_type: &str) -> ClientResult<u32>;

    /// Refresh the topology/connection view. Invoked after a request
    /// times out locally, throttled by the configured minimum
    /// refresh interval.
    async fn refresh_topology(&self) -> ClientResult<()>;

    /// Send a control request and wait for the broker's answer.
    async fn send_control(&self, request: ControlRequest) -> ClientResult<ControlResponse>;

    /// Send a job command and wait for the broker's answer.
    async fn send_command(&self, request: ExecuteCommandRequest) -> ClientResult<CommandResponse>;
}
