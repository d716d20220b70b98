//! Record and command types for the job data plane.
//!
//! A broker pushes `SubscribedRecord`s to an open subscription; the
//! client answers with `ExecuteCommandRequest`s carrying a COMPLETE or
//! FAIL command for the job key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lifecycle intents of a job, as carried on pushed records and used
/// as dispatch keys by the event appliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobIntent {
    Created,
    Completed,
    Canceled,
    ErrorThrown,
    Failed,
    Migrated,
    RetriesUpdated,
    TimedOut,
}

impl JobIntent {
    /// Number of job lifecycle states.
    pub const COUNT: usize = 8;

    /// Stable slot index for per-state counter arrays.
    pub fn index(self) -> usize {
        match self {
            JobIntent::Created => 0,
            JobIntent::Completed => 1,
            JobIntent::Canceled => 2,
            JobIntent::ErrorThrown => 3,
            JobIntent::Failed => 4,
            JobIntent::Migrated => 5,
            JobIntent::RetriesUpdated => 6,
            JobIntent::TimedOut => 7,
        }
    }

    /// All job intents, in a fixed order.
    pub const ALL: [JobIntent; 8] = [
        JobIntent::Created,
        JobIntent::Completed,
        JobIntent::Canceled,
        JobIntent::ErrorThrown,
        JobIntent::Failed,
        JobIntent::Migrated,
        JobIntent::RetriesUpdated,
        JobIntent::TimedOut,
    ];
}

/// Top-level intent namespace. Only job intents exist in this core;
/// the enum leaves room for further record value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Intent {
    Job(JobIntent),
}

/// Kind of a pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Event,
    Command,
    CommandRejection,
}

/// Schema of the record's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Job,
}

/// Subscription channel a pushed record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    JobSubscription,
}

/// Value of a job record.
///
/// `payload` is `None` when the record carries no payload at all —
/// distinct from an empty encoded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecordValue {
    #[serde(rename = "type")]
    pub job_type: String,
    /// Absolute lock expiration, unix millis.
    pub lock_time: i64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
}

/// A record pushed from broker to client over an open subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedRecord {
    pub partition_id: u32,
    pub key: u64,
    pub position: u64,
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: JobIntent,
    pub subscriber_key: u64,
    pub subscription_type: SubscriptionType,
    pub value: JobRecordValue,
}

/// Terminal command a client issues for a handled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobCommandState {
    Complete,
    Fail,
}

/// The command body sent with an `ExecuteCommandRequest`.
///
/// When `payload` is `None` the field is omitted from the serialized
/// form entirely; a handler that explicitly declines to set a payload
/// must not produce an empty one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCommand {
    pub state: JobCommandState,
    #[serde(rename = "type")]
    pub job_type: String,
    pub lock_owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

/// A command request keyed by job key, directed at one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandRequest {
    pub partition_id: u32,
    pub key: u64,
    pub command: JobCommand,
}

/// Semantic rejection of an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionType {
    BadValue,
    NotApplicable,
    ProcessingError,
}

/// Broker response to an `ExecuteCommandRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// Command applied; carries the resulting job intent.
    Ok { intent: JobIntent },
    /// Command rejected semantically.
    Rejection {
        rejection_type: RejectionType,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_command_without_payload_omits_field() {
        let cmd = JobCommand {
            state: JobCommandState::Complete,
            job_type: "bar".to_string(),
            lock_owner: "foo".to_string(),
            payload: None,
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["state"], "COMPLETE");
        assert_eq!(json["type"], "bar");
        assert_eq!(json["lockOwner"], "foo");
    }

    #[test]
    fn complete_command_with_payload_keeps_field() {
        let cmd = JobCommand {
            state: JobCommandState::Complete,
            job_type: "bar".to_string(),
            lock_owner: "foo".to_string(),
            payload: Some(vec![1, 2, 3]),
        };

        let json = serde_json::to_value(&cmd).unwrap();
        assert!(json.get("payload").is_some());
    }

    #[test]
    fn subscribed_record_round_trips() {
        let record = SubscribedRecord {
            partition_id: 1,
            key: 4,
            position: 5,
            record_type: RecordType::Event,
            value_type: ValueType::Job,
            intent: JobIntent::Created,
            subscriber_key: 123,
            subscription_type: SubscriptionType::JobSubscription,
            value: JobRecordValue {
                job_type: "type".to_string(),
                lock_time: 10_000,
                retries: 3,
                payload: None,
                headers: BTreeMap::new(),
            },
        };

        let bytes = serde_json::to_vec(&record).unwrap();
        let back: SubscribedRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn job_intent_all_covers_every_state() {
        assert_eq!(JobIntent::ALL.len(), 8);
        // No duplicates.
        for (i, a) in JobIntent::ALL.iter().enumerate() {
            for b in &JobIntent::ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
