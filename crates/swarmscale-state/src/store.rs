//! StateStore — redb-backed threshold persistence for swarmscale.
//!
//! Provides typed operations over the threshold table. Values are
//! JSON-serialized into redb's `&[u8]` value column. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
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

/// Per-service threshold persistence, shared by every component.
///
/// Single-row lookups report a missing row as [`StateError::NotFound`];
/// collection lookups return an empty vector instead.
pub trait ThresholdStore: Send + Sync {
    /// Get the thresholds for one service.
    fn get_threshold(&self, service_id: &str) -> StateResult<ThresholdConfig>;

    /// List every stored threshold row.
    fn list_thresholds(&self) -> StateResult<Vec<ThresholdConfig>>;

    /// Insert a new row. Fails with `AlreadyExists` if the service has one.
    fn insert_threshold(
        &self,
        service_id: &str,
        limits: ThresholdLimits,
    ) -> StateResult<ThresholdConfig>;

    /// Insert or replace the limits for a service, keeping its row id.
    fn put_threshold(
        &self,
        service_id: &str,
        limits: ThresholdLimits,
    ) -> StateResult<ThresholdConfig>;
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
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(THRESHOLDS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Allocate the next threshold row id inside an open write transaction.
    fn next_threshold_id(txn: &WriteTransaction) -> StateResult<u64> {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        let last = meta
            .get(THRESHOLD_SEQ)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = last + 1;
        meta.insert(THRESHOLD_SEQ, next).map_err(map_err!(Write))?;
        Ok(next)
    }

    /// Write a row, assigning a fresh id unless one already exists.
    ///
    /// With `reject_existing`, an existing row makes this fail instead.
    fn write_threshold(
        &self,
        service_id: &str,
        limits: ThresholdLimits,
        reject_existing: bool,
    ) -> StateResult<ThresholdConfig> {
        limits.validate()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let row;
        {
            let mut table = txn.open_table(THRESHOLDS).map_err(map_err!(Table))?;
            let existing: Option<ThresholdConfig> = match table
                .get(service_id)
                .map_err(map_err!(Read))?
            {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };

            let id = match existing {
                Some(_) if reject_existing => {
                    return Err(StateError::AlreadyExists(service_id.to_string()));
                }
                Some(current) => current.id,
                None => Self::next_threshold_id(&txn)?,
            };

            row = ThresholdConfig {
                id,
                service_id: service_id.to_string(),
                low_mem_threshold: limits.low_mem_threshold,
                high_mem_threshold: limits.high_mem_threshold,
            };
            let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
            table
                .insert(service_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%service_id, id = row.id, "threshold stored");
        Ok(row)
    }
}

impl ThresholdStore for StateStore {
    fn get_threshold(&self, service_id: &str) -> StateResult<ThresholdConfig> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(THRESHOLDS).map_err(map_err!(Table))?;
        match table.get(service_id).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Err(StateError::NotFound(service_id.to_string())),
        }
    }

    fn list_thresholds(&self) -> StateResult<Vec<ThresholdConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(THRESHOLDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: ThresholdConfig =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    fn insert_threshold(
        &self,
        service_id: &str,
        limits: ThresholdLimits,
    ) -> StateResult<ThresholdConfig> {
        self.write_threshold(service_id, limits, true)
    }

    fn put_threshold(
        &self,
        service_id: &str,
        limits: ThresholdLimits,
    ) -> StateResult<ThresholdConfig> {
        self.write_threshold(service_id, limits, false)
    }
}
