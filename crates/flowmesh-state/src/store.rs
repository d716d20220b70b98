//! StateStore — redb-backed column-family store.
//!
//! All mutations run inside `StateStore::transaction`, which commits
//! on `Ok` and rolls back on `Err`; reads within the transaction see
//! earlier writes of the same transaction. Diagnostic readers use
//! `StateStore::snapshot` for a consistent read-only view. Values are
//! JSON-serialized into redb's `&[u8]` value columns; keys are
//! pre-encoded composite keys (see the `key` module).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::families::ColumnFamilyId;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe column-family store backed by redb.
///
/// Single-writer discipline is by convention: one partition's stream
/// processor owns the write path, everyone else reads snapshots.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_families()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_families()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all column-family tables if they don't exist yet.
    fn ensure_families(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for cf in ColumnFamilyId::ALL {
            txn.open_table(cf.def()).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back every write when it
    /// returns `Err`. Reads inside the transaction observe its own
    /// earlier writes.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut StateTransaction) -> StateResult<T>,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut stx = StateTransaction { txn };
        match f(&mut stx) {
            Ok(value) => {
                stx.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                let _ = stx.txn.abort();
                Err(e)
            }
        }
    }

    /// Run `f` against a consistent read-only snapshot.
    pub fn snapshot<T>(&self, f: impl FnOnce(&StateSnapshot) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&StateSnapshot { txn })
    }
}

/// A write transaction over the column-family store.
pub struct StateTransaction {
    txn: redb::WriteTransaction,
}

impl StateTransaction {
    /// Get the value under `key`, if present.
    pub fn get<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StateResult<Option<V>> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Check for presence without deserializing.
    pub fn exists(&self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<bool> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }

    /// Insert a new entry. Fails with `AlreadyExists` if the key is
    /// present — used where absence is an invariant.
    pub fn insert<V: Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        if table.get(key).map_err(map_err!(Read))?.is_some() {
            return Err(StateError::AlreadyExists(cf.name().to_string()));
        }
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Overwrite an existing entry. Fails with `NotFound` if absent.
    pub fn update<V: Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        if table.get(key).map_err(map_err!(Read))?.is_none() {
            return Err(StateError::NotFound(cf.name().to_string()));
        }
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Insert-or-overwrite. Returns `true` when the key was new, so a
    /// counting decorator can track net inserts.
    pub fn upsert<V: Serialize>(
        &mut self,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &V,
    ) -> StateResult<bool> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        let prior = table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(prior.is_none())
    }

    /// Delete an entry that must exist. Fails with `NotFound` if absent.
    pub fn delete_existing(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<()> {
        let mut table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        let prior = table.remove(key).map_err(map_err!(Write))?;
        if prior.is_none() {
            return Err(StateError::NotFound(cf.name().to_string()));
        }
        Ok(())
    }

    /// Delete an entry if present. Returns `true` when it existed.
    pub fn delete_if_exists(&mut self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<bool> {
        let mut table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        let prior = table.remove(key).map_err(map_err!(Write))?;
        Ok(prior.is_some())
    }

    /// Whether the column family holds no entries.
    pub fn is_empty(&self, cf: ColumnFamilyId) -> StateResult<bool> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        table.is_empty().map_err(map_err!(Read))
    }

    /// Visit every entry in key order.
    pub fn for_each<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        mut visitor: impl FnMut(&[u8], V) -> StateResult<()>,
    ) -> StateResult<()> {
        self.while_true(cf, |key, value| {
            visitor(key, value)?;
            Ok(true)
        })
    }

    /// Visit entries in key order until the visitor returns `false`.
    pub fn while_true<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        mut visitor: impl FnMut(&[u8], V) -> StateResult<bool>,
    ) -> StateResult<()> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let decoded = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !visitor(key.value(), decoded)? {
                break;
            }
        }
        Ok(())
    }

    /// Visit entries whose key starts with `prefix`, in key order,
    /// until the visitor returns `false` or the prefix ends.
    pub fn while_equal_prefix<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        prefix: &[u8],
        mut visitor: impl FnMut(&[u8], V) -> StateResult<bool>,
    ) -> StateResult<()> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                // Keys are sorted; once past the prefix there is no
                // further match.
                break;
            }
            let decoded = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !visitor(key.value(), decoded)? {
                break;
            }
        }
        Ok(())
    }
}

/// A consistent read-only view of the store.
pub struct StateSnapshot {
    txn: redb::ReadTransaction,
}

impl StateSnapshot {
    /// Get the value under `key`, if present.
    pub fn get<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> StateResult<Option<V>> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Check for presence without deserializing.
    pub fn exists(&self, cf: ColumnFamilyId, key: &[u8]) -> StateResult<bool> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }

    /// Whether the column family holds no entries.
    pub fn is_empty(&self, cf: ColumnFamilyId) -> StateResult<bool> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        table.is_empty().map_err(map_err!(Read))
    }

    /// Visit every entry in key order.
    pub fn for_each<V: DeserializeOwned>(
        &self,
        cf: ColumnFamilyId,
        mut visitor: impl FnMut(&[u8], V) -> StateResult<()>,
    ) -> StateResult<()> {
        let table = self.txn.open_table(cf.def()).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let decoded = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            visitor(key.value(), decoded)?;
        }
        Ok(())
    }
}
