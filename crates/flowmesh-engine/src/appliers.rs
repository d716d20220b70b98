//! Versioned event-applier registry.
//!
//! Recovery replays the event stream through this registry: each
//! record dispatches to the applier registered for exactly its
//! `(intent, record version)` pair. Registration is code-driven and
//! happens in one fixed order at startup, so every replica resolves an
//! identical registry and replay stays deterministic.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use flowmesh_protocol::{Intent, JobRecordValue};

use crate::error::{EngineError, EngineResult};

/// A state mutation for one event kind at one record version.
///
/// Appliers must be deterministic: same record in, same state
/// transition out, on every replay.
pub trait EventApplier: Send + Sync {
    fn apply(&self, key: u64, value: &JobRecordValue) -> EngineResult<()>;
}

/// Applier for events that carry no state effect.
struct NoopApplier;

impl EventApplier for NoopApplier {
    fn apply(&self, _key: u64, _value: &JobRecordValue) -> EngineResult<()> {
        Ok(())
    }
}

/// The `(intent, version) → applier` dispatch table.
pub struct EventAppliers {
    appliers: HashMap<Intent, BTreeMap<u32, Box<dyn EventApplier>>>,
}

impl EventAppliers {
    pub fn new() -> Self {
        Self {
            appliers: HashMap::new(),
        }
    }

    /// Register an applier for `(intent, version)`.
    ///
    /// A second registration for the same pair fails; the fixed
    /// registration order must not contain duplicates.
    pub fn register(
        &mut self,
        intent: Intent,
        version: u32,
        applier: Box<dyn EventApplier>,
    ) -> EngineResult<()> {
        let versions = self.appliers.entry(intent).or_default();
        if versions.contains_key(&version) {
            return Err(EngineError::DuplicateApplier { intent, version });
        }
        versions.insert(version, applier);
        debug!(?intent, version, "event applier registered");
        Ok(())
    }

    /// Register an explicit no-op for an intent whose events carry no
    /// state effect. Distinct from not registering at all: replay
    /// accepts the record instead of reporting an unknown intent.
    pub fn register_noop(&mut self, intent: Intent, version: u32) -> EngineResult<()> {
        self.register(intent, version, Box::new(NoopApplier))
    }

    /// Highest registered version for an intent, if any.
    pub fn get_latest_version(&self, intent: Intent) -> Option<u32> {
        self.appliers
            .get(&intent)
            .and_then(|versions| versions.keys().next_back().copied())
    }

    /// Every registered `(intent, version)` pair, for registry
    /// pinning in tests.
    pub fn registered_appliers(&self) -> Vec<(Intent, u32)> {
        let mut pairs: Vec<(Intent, u32)> = self
            .appliers
            .iter()
            .flat_map(|(intent, versions)| versions.keys().map(|v| (*intent, *v)))
            .collect();
        pairs.sort();
        pairs
    }

    /// Dispatch one replayed record to its exact-version applier.
    ///
    /// No fallback to another version: a missing version surfaces as
    /// `NoApplierForVersion` so the caller can choose skip-vs-abort.
    pub fn apply_state(
        &self,
        key: u64,
        intent: Intent,
        value: &JobRecordValue,
        record_version: u32,
    ) -> EngineResult<()> {
        let versions = self
            .appliers
            .get(&intent)
            .ok_or(EngineError::NoApplierForIntent { intent })?;
        let applier = versions.get(&record_version).ok_or_else(|| {
            // Non-empty by construction: register is the only insert path.
            let latest = versions.keys().next_back().copied().unwrap_or(0);
            EngineError::NoApplierForVersion {
                intent,
                version: record_version,
                latest,
            }
        })?;
        applier.apply(key, value)
    }
}

impl Default for EventAppliers {
    fn default() -> Self {
        Self::new()
    }
}
