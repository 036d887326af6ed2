//! Item status values and the persisted progress row.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ProgressError;

/// Processing status of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Enumerated, not yet parsed.
    Pending,
    /// Download descriptor extracted.
    Parsed,
    /// Payload written to its final path.
    Downloaded,
    /// Permanently failed for this query.
    Failed,
}

impl ItemStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }

    /// Terminal statuses are the only ones the progress store records.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "parsed" => Ok(Self::Parsed),
            "downloaded" => Ok(Self::Downloaded),
            "failed" => Ok(Self::Failed),
            other => Err(ProgressError::InvalidStatus(other.to_string())),
        }
    }
}

/// One persisted terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ProgressRecord {
    /// Catalog item identifier.
    pub item_id: String,
    /// Stored as text, parsed via [`ProgressRecord::status`].
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Failure reason for failed items.
    pub detail: Option<String>,
    /// SQLite `datetime('now')` of the last status change.
    pub updated_at: String,
}

impl ProgressRecord {
    /// Parses the stored status.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::InvalidStatus`] for unknown values.
    pub fn status(&self) -> Result<ItemStatus, ProgressError> {
        self.status_str.parse()
    }
}

/// What a `mark` call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// First record for this item.
    Inserted,
    /// Same status already recorded; nothing written.
    Unchanged,
    /// A different terminal status was replaced.
    Overwritten {
        /// Status that was recorded before this call.
        previous: ItemStatus,
    },
}
