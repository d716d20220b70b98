//! flowmesh-protocol — wire-level types shared by broker and client.
//!
//! Covers the control plane (subscription management, credit
//! replenishment), the data plane (pushed job records), job commands
//! (COMPLETE/FAIL) with their rejection codes, and the binary payload
//! codec used for job payloads.
//!
//! These types are transport-agnostic: the actual network layer is a
//! collaborator behind the client's transport trait.

pub mod messages;
pub mod payload;
pub mod record;

pub use messages::*;
pub use payload::{decode_payload, encode_payload, PayloadError, PayloadValue};
pub use record::*;
