//! flowmesh-state — embedded partition state store.
//!
//! Backed by [redb](https://docs.rs/redb), organized into column
//! families with pinned integer tags. Values are JSON-serialized into
//! redb's `&[u8]` value columns; composite keys use an order-preserving
//! NUL-terminated encoding so prefix scans walk related entries in key
//! order.
//!
//! # Architecture
//!
//! One partition owns one `StateStore`; all mutations for that
//! partition go through `StateStore::transaction`, which either fully
//! commits or fully rolls back. Concurrent diagnostic readers use
//! `StateStore::snapshot`. The `StateStore` is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`).
//!
//! Typed facades (the job-metrics facade in this crate is the
//! reference instance) wrap the raw store with domain accessors; the
//! `stats` module decorates mutating operations with live
//! per-column-family entry counts.

pub mod error;
pub mod families;
pub mod jobmetrics;
pub mod key;
pub mod stats;
pub mod store;

pub use error::{StateError, StateResult};
pub use families::ColumnFamilyId;
pub use jobmetrics::{
    job_metrics_state, DbJobMetricsState, JobMetricsKey, JobMetricsState, JobMetricsValue,
    JobWorkerCounters, MonitoringValue, NoopJobMetricsState, StatusMetric,
};
pub use key::{decode_composite, encode_composite};
pub use stats::{CountedTransaction, StoreStatistics};
pub use store::{StateSnapshot, StateStore, StateTransaction};
