use std::time::Duration;

use flowmesh_protocol::{BrokerError, JobCommandState, RejectionType};
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A subscription parameter failed validation before any network
    /// call was made.
    #[error("{0}")]
    Validation(String),

    #[error("Could not open subscription: {0}")]
    SubscriptionOpen(String),

    /// The broker accepted the command but rejected it semantically.
    #[error("command {command:?} for job {job_key} rejected ({rejection_type:?}): {reason}")]
    Rejection {
        command: JobCommandState,
        job_key: u64,
        rejection_type: RejectionType,
        reason: String,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("subscription is closed")]
    Closed,
}
