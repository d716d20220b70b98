//! Control-plane messages between client and broker.
//!
//! Each control request is directed at a specific partition and
//! identified by its message type. The broker answers with either a
//! `ControlResponse` or a `BrokerError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message-type tag for control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessageType {
    AddJobSubscription,
    RemoveJobSubscription,
    IncreaseJobSubscriptionCredits,
}

/// Open a job subscription on the partition owning `job_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddJobSubscription {
    pub job_type: String,
    pub lock_owner: String,
    /// Lock duration in milliseconds.
    pub lock_duration: u64,
    /// Initial credit grant.
    pub credits: u32,
}

/// Close the subscription identified by `subscriber_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveJobSubscription {
    pub subscriber_key: u64,
}

/// Replenish credits for an open subscription. `credits` is always > 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncreaseJobSubscriptionCredits {
    pub subscriber_key: u64,
    pub credits: u32,
}

/// A control request directed at one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub partition_id: u32,
    pub body: ControlRequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlRequestBody {
    AddJobSubscription(AddJobSubscription),
    RemoveJobSubscription(RemoveJobSubscription),
    IncreaseJobSubscriptionCredits(IncreaseJobSubscriptionCredits),
}

impl ControlRequestBody {
    pub fn message_type(&self) -> ControlMessageType {
        match self {
            ControlRequestBody::AddJobSubscription(_) => ControlMessageType::AddJobSubscription,
            ControlRequestBody::RemoveJobSubscription(_) => {
                ControlMessageType::RemoveJobSubscription
            }
            ControlRequestBody::IncreaseJobSubscriptionCredits(_) => {
                ControlMessageType::IncreaseJobSubscriptionCredits
            }
        }
    }
}

/// Successful broker answer to a control request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlResponse {
    /// Subscription opened; carries the broker-assigned key.
    SubscriptionOpened { subscriber_key: u64 },
    /// Request acknowledged without further data.
    Acknowledged,
}

/// Error codes a broker attaches to a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PartitionNotFound,
    RequestProcessingFailure,
    InvalidMessage,
}

/// An explicit error response from the broker.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("broker error ({code:?}): {message}")]
pub struct BrokerError {
    pub code: ErrorCode,
    pub message: String,
}
