//! StateStore — redb-backed task status persistence for Vigil.
//!
//! Provides typed operations over task records. Statuses are appended in
//! a single write transaction together with the record's `state` and
//! `updated_at`, so readers never observe a half-applied update. Both an
//! on-disk and an in-memory backend (the latter for testing) are supported.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
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

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace a task record.
    pub fn put_task(&self, record: &TaskRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(task_id = %record.id, "task stored");
        Ok(())
    }

    /// Get a task record by id.
    pub fn get_task(&self, task_id: &str) -> StateResult<Option<TaskRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(task_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: TaskRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all task records, ordered by id.
    pub fn list_tasks(&self) -> StateResult<Vec<TaskRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: TaskRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete a task record. Returns true if it existed.
    pub fn delete_task(&self, task_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            existed = table.remove(task_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%task_id, existed, "task deleted");
        Ok(existed)
    }

    /// Append a status to a task and return the updated record.
    pub fn append_status(&self, task_id: &str, status: TaskStatus) -> StateResult<TaskRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            let existing = match table.get(task_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<TaskRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            let mut record =
                existing.ok_or_else(|| StateError::TaskNotFound(task_id.to_string()))?;

            record.state = status.state;
            record.updated_at = status.timestamp;
            record.statuses.push(status);

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(task_id, value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %task_id,
            state = ?record.state,
            healthy = ?record.healthy(),
            statuses = record.statuses.len(),
            "task status appended"
        );
        Ok(record)
    }

    /// The most recent status of a task (reconciliation).
    pub fn latest_status(&self, task_id: &str) -> StateResult<Option<TaskStatus>> {
        Ok(self
            .get_task(task_id)?
            .and_then(|record| record.statuses.last().cloned()))
    }

    /// Snapshot of every task for the state endpoint.
    pub fn snapshot(&self) -> StateResult<StateSnapshot> {
        Ok(StateSnapshot {
            tasks: self.list_tasks()?,
        })
    }
}
