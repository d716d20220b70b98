//! flowmesh-client — job subscriptions with credit-based flow control.
//!
//! A `JobSubscriptionManager` multiplexes any number of job
//! subscriptions over one broker transport. Each subscription holds a
//! credit capacity the broker may fill with pushed jobs; a shared
//! worker pool executes handlers and acknowledges every job with
//! COMPLETE or FAIL, freeing one credit per outcome. Freed credits
//! flow back to the broker in batches once a replenishment threshold
//! is reached.
//!
//! Subscriptions reopen transparently after a transport interruption,
//! within a bounded retry budget; close is idempotent and always wins
//! on the client side.

pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use config::{ClientConfig, REPLENISHMENT_THRESHOLD};
pub use error::{ClientError, ClientResult};
pub use job::{ActivatedJob, JobHandler};
pub use manager::{JobSubscription, JobSubscriptionManager};
pub use subscription::{JobSubscriptionBuilder, SubscriptionState};
pub use transport::{BrokerTransport, TransportEvent};
