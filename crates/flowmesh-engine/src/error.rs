use flowmesh_protocol::Intent;
use flowmesh_state::StateError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Registering the same `(intent, version)` twice is a programming
    /// error in the registration order, not a runtime condition.
    #[error("applier already registered for {intent:?} version {version}")]
    DuplicateApplier { intent: Intent, version: u32 },

    #[error("no applier registered for intent {intent:?}")]
    NoApplierForIntent { intent: Intent },

    /// The intent is known but this record version is not. `latest`
    /// lets the caller decide between skipping and aborting replay.
    #[error("no applier for {intent:?} version {version} (latest registered: {latest})")]
    NoApplierForVersion {
        intent: Intent,
        version: u32,
        latest: u32,
    },

    #[error(transparent)]
    State(#[from] StateError),
}
