//! The job view handed to subscription handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowmesh_protocol::{decode_payload, PayloadError, PayloadValue, SubscribedRecord};

/// Metadata and payload of one pushed job, as seen by a handler.
#[derive(Debug, Clone)]
pub struct ActivatedJob {
    key: u64,
    job_type: String,
    /// Absolute lock expiration, unix millis.
    lock_expiration: i64,
    retries: u32,
    headers: BTreeMap<String, String>,
    payload: Option<Vec<u8>>,
}

impl ActivatedJob {
    pub(crate) fn from_record(record: &SubscribedRecord) -> Self {
        Self {
            key: record.key,
            job_type: record.value.job_type.clone(),
            lock_expiration: record.value.lock_time,
            retries: record.value.retries,
            headers: record.value.headers.clone(),
            payload: record.value.payload.clone(),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn lock_expiration(&self) -> i64 {
        self.lock_expiration
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Decode the job payload. `None` when the record carried no
    /// payload at all.
    pub fn payload(&self) -> Result<Option<PayloadValue>, PayloadError> {
        match &self.payload {
            Some(bytes) => Ok(Some(decode_payload(bytes)?)),
            None => Ok(None),
        }
    }
}

/// A job handler. Runs on a blocking worker; blocking inside is fine.
///
/// `Ok(Some(payload))` completes the job with a result payload,
/// `Ok(None)` completes it without one (the field is omitted from the
/// command), `Err` fails the job.
pub type JobHandler =
    Arc<dyn Fn(&ActivatedJob) -> anyhow::Result<Option<PayloadValue>> + Send + Sync>;
