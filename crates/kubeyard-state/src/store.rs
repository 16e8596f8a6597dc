//! StateStore: redb-backed persistence for Kubeyard clusters.
//!
//! Provides typed operations over cluster records, cluster details and the
//! cluster → VM mapping. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).
//!
//! The lifecycle `state` of a record is written only at creation and by
//! [`StateStore::compare_and_set_state`]; [`StateStore::update_cluster`]
//! discards any state change its closure makes.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Result of a conditional state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The persisted state no longer matched the expected value.
    Stale { actual: ClusterState },
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTER_DETAILS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTER_VMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping values whose key starts with `prefix`.
    fn scan_json<T: DeserializeOwned>(&self, def: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let item: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(item);
            }
        }
        Ok(results)
    }

    /// Read-modify-write of one JSON value inside a single write transaction.
    ///
    /// `apply` may veto the write by returning `Ok(None)`; the stored value is
    /// then left untouched and `Ok(None)` is returned.
    fn modify_json<T, R, F>(&self, def: JsonTable, key: &str, apply: F) -> StateResult<Option<R>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Option<R>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let raw = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(key.to_string()))?;
            let mut value: T = serde_json::from_slice(&raw).map_err(map_err!(Deserialize))?;
            outcome = apply(&mut value);
            if outcome.is_some() {
                let bytes = serde_json::to_vec(&value).map_err(map_err!(Serialize))?;
                table
                    .insert(key, bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    // ── Clusters ──────────────────────────────────────────────────

    /// Persist a new cluster and its details in one write transaction.
    ///
    /// The record is stored in [`ClusterState::Created`] whatever state it carries.
    pub fn create_cluster(
        &self,
        record: &ClusterRecord,
        details: &ClusterDetails,
    ) -> StateResult<()> {
        let mut record = record.clone();
        record.state = ClusterState::Created;
        let key = record.id.as_str();
        let record_bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let details_bytes = serde_json::to_vec(details).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            if clusters.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(key.to_string()));
            }
            clusters
                .insert(key, record_bytes.as_slice())
                .map_err(map_err!(Write))?;
            let mut table = txn.open_table(CLUSTER_DETAILS).map_err(map_err!(Table))?;
            table
                .insert(key, details_bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %key, name = %record.name, "cluster stored");
        Ok(())
    }

    /// Get a cluster by ID, including soft-deleted ones.
    pub fn get_cluster(&self, id: &str) -> StateResult<Option<ClusterRecord>> {
        self.get_json(CLUSTERS, id)
    }

    /// List every cluster record, including soft-deleted ones.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterRecord>> {
        self.scan_json(CLUSTERS, "")
    }

    /// Live (not soft-deleted) clusters currently in `state`.
    pub fn list_clusters_in_state(&self, state: ClusterState) -> StateResult<Vec<ClusterRecord>> {
        Ok(self
            .list_clusters()?
            .into_iter()
            .filter(|c| !c.is_removed() && c.state == state)
            .collect())
    }

    /// Live clusters whose last teardown did not complete.
    pub fn list_gc_pending(&self) -> StateResult<Vec<ClusterRecord>> {
        Ok(self
            .list_clusters()?
            .into_iter()
            .filter(|c| !c.is_removed() && c.gc_pending)
            .collect())
    }

    /// Apply `f` to a cluster record and persist it. State changes made by
    /// `f` are discarded.
    pub fn update_cluster<F>(&self, id: &str, f: F) -> StateResult<ClusterRecord>
    where
        F: FnOnce(&mut ClusterRecord),
    {
        let updated = self.modify_json(CLUSTERS, id, |record: &mut ClusterRecord| {
            let state = record.state;
            f(record);
            record.state = state;
            record.updated_at = epoch_secs();
            Some(record.clone())
        })?;
        updated.ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Write `new` only if the persisted state still equals `expected`.
    pub fn compare_and_set_state(
        &self,
        id: &str,
        expected: ClusterState,
        new: ClusterState,
    ) -> StateResult<CasOutcome> {
        let mut actual = expected;
        let applied = self.modify_json(CLUSTERS, id, |record: &mut ClusterRecord| {
            if record.state != expected {
                actual = record.state;
                return None;
            }
            record.state = new;
            record.updated_at = epoch_secs();
            Some(())
        })?;
        Ok(match applied {
            Some(()) => CasOutcome::Applied,
            None => CasOutcome::Stale { actual },
        })
    }

    /// Mark a cluster removed. The record stays readable for auditing.
    pub fn soft_delete_cluster(&self, id: &str) -> StateResult<()> {
        self.update_cluster(id, |record| {
            if record.removed_at.is_none() {
                record.removed_at = Some(epoch_secs());
            }
            record.gc_pending = false;
        })?;
        debug!(cluster = %id, "cluster soft-deleted");
        Ok(())
    }

    // ── Details ───────────────────────────────────────────────────

    pub fn get_details(&self, cluster_id: &str) -> StateResult<Option<ClusterDetails>> {
        self.get_json(CLUSTER_DETAILS, cluster_id)
    }

    pub fn update_details<F>(&self, cluster_id: &str, f: F) -> StateResult<ClusterDetails>
    where
        F: FnOnce(&mut ClusterDetails),
    {
        let updated = self.modify_json(CLUSTER_DETAILS, cluster_id, |details: &mut ClusterDetails| {
            f(details);
            Some(details.clone())
        })?;
        updated.ok_or_else(|| StateError::NotFound(cluster_id.to_string()))
    }

    // ── VM mapping ────────────────────────────────────────────────

    /// Append a VM after the highest existing index (0 for the first one).
    pub fn append_vm(&self, cluster_id: &str, vm_id: &str) -> StateResult<ClusterVmMapping> {
        let prefix = vm_prefix(cluster_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mapping;
        {
            let mut table = txn.open_table(CLUSTER_VMS).map_err(map_err!(Table))?;
            let mut next_index = 0;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                if !key.value().starts_with(&prefix) {
                    continue;
                }
                let existing: ClusterVmMapping =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                next_index = next_index.max(existing.index + 1);
            }
            mapping = ClusterVmMapping {
                cluster_id: cluster_id.to_string(),
                index: next_index,
                vm_id: vm_id.to_string(),
            };
            let key = mapping.table_key();
            let bytes = serde_json::to_vec(&mapping).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster = %cluster_id, vm = %vm_id, index = mapping.index, "vm mapped");
        Ok(mapping)
    }

    /// Mapped VMs of a cluster in index order, master first.
    pub fn list_vms(&self, cluster_id: &str) -> StateResult<Vec<ClusterVmMapping>> {
        self.scan_json(CLUSTER_VMS, &vm_prefix(cluster_id))
    }

    /// Drop one mapping entry. Returns true if it existed.
    pub fn remove_vm(&self, cluster_id: &str, index: u32) -> StateResult<bool> {
        let key = vm_key(cluster_id, index);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTER_VMS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "vm unmapped");
        Ok(existed)
    }
}
