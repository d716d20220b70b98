//! Statistics decorator for the column-family store.
//!
//! `CountedTransaction` wraps a `StateTransaction` and forwards its
//! mutating operations, keeping a persisted per-column-family entry
//! count in the `EntryCounts` family so call sites never pay for a
//! full scan. `StoreStatistics` reads those counters back as gauges —
//! but only once the recovery pass is marked complete, so replay does
//! not double-export metrics.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::StateResult;
use crate::families::ColumnFamilyId;
use crate::store::{StateStore, StateTransaction};

fn counter_key(cf: ColumnFamilyId) -> Vec<u8> {
    let mut key = cf.name().as_bytes().to_vec();
    key.push(0);
    key
}

/// A counting wrapper over a write transaction.
///
/// Tracks net inserts and deletes for the families it touches. All
/// counter writes share the wrapped transaction, so a rollback takes
/// the counter adjustments with it.
pub struct CountedTransaction<'a> {
    inner: &'a mut StateTransaction,
}

impl<'a> CountedTransaction<'a> {
    pub fn new(inner: &'a mut StateTransaction) -> Self {
        Self { inner }
    }

    fn adjust(&mut self, cf: ColumnFamilyId, delta: i64) -> StateResult<()> {
        let key = counter_key(cf);
        let current: u64 = self
            .inner
            .get(ColumnFamilyId::EntryCounts, &key)?
            .unwrap_or(0);
        let next = current.saturating_add_signed(delta);
        self.inner
            .upsert(ColumnFamilyId::EntryCounts, &key, &next)?;
        Ok(())
    }

    /// Forwarded `insert`; increments the family's entry count.
    pub fn insert<V: serde::Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<()> {
        self.inner.insert(cf, key, value)?;
        self.adjust(cf, 1)
    }

    /// Forwarded `upsert`; increments the count only when the key is new.
    pub fn upsert<V: serde::Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<bool> {
        let was_new = self.inner.upsert(cf, key, value)?;
        if was_new {
            self.adjust(cf, 1)?;
        }
        Ok(was_new)
    }

    /// Forwarded `update`; never changes the entry count.
    pub fn update<V: serde::Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<()> {
        self.inner.update(cf, key, value)
    }

    /// Forwarded `delete_existing`; decrements the entry count.
    pub fn delete_existing(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<()> {
        self.inner.delete_existing(cf, key)?;
        self.adjust(cf, -1)
    }

    /// Forwarded `delete_if_exists`; decrements only when the key existed.
    pub fn delete_if_exists(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<bool> {
        let existed = self.inner.delete_if_exists(cf, key)?;
        if existed {
            self.adjust(cf, -1)?;
        }
        Ok(existed)
    }

    /// Read-through to the wrapped transaction.
    pub fn get<V: serde::de::DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StateResult<Option<V>> {
        self.inner.get(cf, key)
    }

    /// Read-through to the wrapped transaction.
    pub fn exists(&self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<bool> {
        self.inner.exists(cf, key)
    }
}

/// Entry-count gauges, gated on recovery completion.
pub struct StoreStatistics {
    store: StateStore,
    recovered: AtomicBool,
}

impl StoreStatistics {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            recovered: AtomicBool::new(false),
        }
    }

    /// Mark the recovery/replay pass as finished; gauges export from
    /// here on.
    pub fn mark_recovery_complete(&self) {
        self.recovered.store(true, Ordering::Release);
        debug!("state recovery complete, entry-count gauges enabled");
    }

    /// The persisted entry count for one column family. Available
    /// regardless of recovery state (internal callers need it during
    /// replay).
    pub fn entry_count(&self, cf: ColumnFamilyId) -> StateResult<u64> {
        let key = counter_key(cf);
        self.store
            .snapshot(|snap| Ok(snap.get(ColumnFamilyId::EntryCounts, &key)?.unwrap_or(0)))
    }

    /// Export `(family name, entry count)` gauges. Empty until
    /// recovery has been marked complete.
    pub fn export_gauges(&self) -> StateResult<Vec<(&'static str, u64)>> {
        if !self.recovered.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }
        let mut gauges = Vec::new();
        for cf in ColumnFamilyId::ALL {
            if cf == ColumnFamilyId::EntryCounts {
                continue;
            }
            gauges.push((cf.name(), self.entry_count(cf)?));
        }
        Ok(gauges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    const CF: ColumnFamilyId = ColumnFamilyId::Default;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Value {
        n: u32,
    }

    fn store_with_stats() -> (StateStore, StoreStatistics) {
        let store = StateStore::open_in_memory().unwrap();
        let stats = StoreStatistics::new(store.clone());
        (store, stats)
    }

    #[test]
    fn insert_and_delete_move_the_counter() {
        let (store, stats) = store_with_stats();

        store
            .transaction(|txn| {
                let mut counted = CountedTransaction::new(txn);
                counted.insert(CF, b"a", &Value { n: 1 })?;
                counted.insert(CF, b"b", &Value { n: 2 })?;
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.entry_count(CF).unwrap(), 2);

        store
            .transaction(|txn| {
                let mut counted = CountedTransaction::new(txn);
                counted.delete_existing(CF, b"a")
            })
            .unwrap();
        assert_eq!(stats.entry_count(CF).unwrap(), 1);
    }

    #[test]
    fn upsert_counts_only_new_keys() {
        let (store, stats) = store_with_stats();

        store
            .transaction(|txn| {
                let mut counted = CountedTransaction::new(txn);
                assert!(counted.upsert(CF, b"a", &Value { n: 1 })?);
                assert!(!counted.upsert(CF, b"a", &Value { n: 2 })?);
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.entry_count(CF).unwrap(), 1);
    }

    #[test]
    fn delete_if_exists_counts_only_real_deletes() {
        let (store, stats) = store_with_stats();

        store
            .transaction(|txn| {
                let mut counted = CountedTransaction::new(txn);
                counted.insert(CF, b"a", &Value { n: 1 })?;
                assert!(counted.delete_if_exists(CF, b"a")?);
                assert!(!counted.delete_if_exists(CF, b"a")?);
                Ok(())
            })
            .unwrap();
        assert_eq!(stats.entry_count(CF).unwrap(), 0);
    }

    #[test]
    fn rollback_takes_counter_adjustments_with_it() {
        let (store, stats) = store_with_stats();

        let result: StateResult<()> = store.transaction(|txn| {
            let mut counted = CountedTransaction::new(txn);
            counted.insert(CF, b"a", &Value { n: 1 })?;
            Err(StateError::Write("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(stats.entry_count(CF).unwrap(), 0);
    }

    #[test]
    fn gauges_hidden_until_recovery_completes() {
        let (store, stats) = store_with_stats();
        store
            .transaction(|txn| {
                let mut counted = CountedTransaction::new(txn);
                counted.insert(CF, b"a", &Value { n: 1 })
            })
            .unwrap();

        assert!(stats.export_gauges().unwrap().is_empty());

        stats.mark_recovery_complete();
        let gauges = stats.export_gauges().unwrap();
        assert!(gauges.contains(&("default", 1)));
    }
}
