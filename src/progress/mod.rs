//! Durable per-query record of terminal item outcomes.
//!
//! The store answers one question for the coordinator: has this item already
//! reached `downloaded` or `failed` for this query? Rows are written with a
//! single-statement upsert each, so one item's write never touches another's.
//!
//! An in-memory mirror of the table avoids a round-trip for every `is_done`
//! check and lets `mark` detect no-op writes without querying first.

mod error;
mod record;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, instrument};

use crate::db::Database;

pub use error::ProgressError;
pub use record::{ItemStatus, MarkOutcome, ProgressRecord};

/// File name of the progress database inside a query's results directory.
pub const PROGRESS_DB_FILE: &str = "progress.db";

/// SQLite-backed progress store for one query.
#[derive(Debug)]
pub struct ProgressStore {
    db: Database,
    cache: RwLock<HashMap<String, ItemStatus>>,
}

impl ProgressStore {
    /// Opens (or creates) the store at `path` and loads existing records.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Open`] if the database cannot be opened or
    /// migrated, and [`ProgressError::Database`] if the initial read fails.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, ProgressError> {
        let db = Database::new(path).await?;
        Self::from_database(db).await
    }

    /// Wraps an already-open database (in-memory databases in tests).
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Database`] if the initial read fails.
    pub async fn from_database(db: Database) -> Result<Self, ProgressError> {
        let store = Self {
            db,
            cache: RwLock::new(HashMap::new()),
        };
        store.load().await?;
        Ok(store)
    }

    /// Re-reads every record and returns the set of done item ids.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] if the query fails or a row carries an
    /// unknown status.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<HashSet<String>, ProgressError> {
        let records = self.records().await?;
        let mut fresh = HashMap::with_capacity(records.len());
        for record in &records {
            fresh.insert(record.item_id.clone(), record.status()?);
        }
        let done: HashSet<String> = fresh.keys().cloned().collect();

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        debug!(done = done.len(), "progress loaded");
        Ok(done)
    }

    /// Records a terminal status for `item_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::NonTerminalStatus`] for `pending`/`parsed`,
    /// or [`ProgressError::Database`] if the write fails.
    pub async fn mark(
        &self,
        item_id: &str,
        status: ItemStatus,
    ) -> Result<MarkOutcome, ProgressError> {
        self.write(item_id, status, None).await
    }

    /// Records `failed` with a human-readable reason.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Database`] if the write fails.
    pub async fn mark_failed(
        &self,
        item_id: &str,
        detail: &str,
    ) -> Result<MarkOutcome, ProgressError> {
        self.write(item_id, ItemStatus::Failed, Some(detail)).await
    }

    #[instrument(skip(self, detail), fields(item_id = %item_id, status = %status))]
    async fn write(
        &self,
        item_id: &str,
        status: ItemStatus,
        detail: Option<&str>,
    ) -> Result<MarkOutcome, ProgressError> {
        if !status.is_terminal() {
            return Err(ProgressError::NonTerminalStatus {
                item_id: item_id.to_string(),
                status: status.to_string(),
            });
        }

        let previous = self.status(item_id);
        if previous == Some(status) {
            debug!("status unchanged, skipping write");
            return Ok(MarkOutcome::Unchanged);
        }

        // The WHERE clause keeps the row (and its timestamp) untouched when
        // another writer already recorded the same status.
        sqlx::query(
            r"INSERT INTO progress (item_id, status, detail, updated_at)
              VALUES (?, ?, ?, datetime('now'))
              ON CONFLICT(item_id) DO UPDATE SET
                  status = excluded.status,
                  detail = excluded.detail,
                  updated_at = excluded.updated_at
              WHERE progress.status <> excluded.status",
        )
        .bind(item_id)
        .bind(status.as_str())
        .bind(detail)
        .execute(self.db.pool())
        .await?;

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id.to_string(), status);

        Ok(match previous {
            None => MarkOutcome::Inserted,
            Some(previous) => MarkOutcome::Overwritten { previous },
        })
    }

    /// Returns true when `item_id` has a terminal record.
    #[must_use]
    pub fn is_done(&self, item_id: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(item_id)
    }

    /// Returns the recorded status for `item_id`, if any.
    #[must_use]
    pub fn status(&self, item_id: &str) -> Option<ItemStatus> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item_id)
            .copied()
    }

    /// Number of items with a terminal record.
    #[must_use]
    pub fn done_count(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns every persisted record ordered by item id.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Database`] if the query fails.
    pub async fn records(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        let rows = sqlx::query_as::<_, ProgressRecord>(
            "SELECT item_id, status, detail, updated_at FROM progress ORDER BY item_id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Closes the underlying pool.
    pub async fn close(self) {
        self.db.close().await;
    }
}
