//! flowmesh-engine — versioned event-applier dispatch.
//!
//! Recovery rebuilds partition state by replaying the event stream
//! through a `(intent, record version) → applier` registry. The
//! registry is assembled in one fixed, code-driven order at startup;
//! dispatch is a pure lookup, so replay of the same stream always
//! produces the same state.

pub mod appliers;
pub mod error;
pub mod job;

pub use appliers::{EventApplier, EventAppliers};
pub use error::{EngineError, EngineResult};
pub use job::{register_job_appliers, wall_clock, Clock};
