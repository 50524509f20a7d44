mod schema;
pub mod migrate;
pub mod search;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use schema::{ADDED_COLUMNS, FTS_SCHEMA, INDEXES, SCHEMA, SCHEMA_VERSION};
pub use search::{SearchHit, HIGHLIGHT_CLOSE, HIGHLIGHT_OPEN};
pub use sqlite::Catalog;

/// Timestamp layout used for `taken_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The one catalog connection, shared by foreground calls and the enrichment worker.
pub type SharedCatalog = Arc<Mutex<Catalog>>;

/// Lock the shared catalog, taking over a poisoned lock. Every write is a
/// single transaction, so there is no partial state to find.
pub fn lock_catalog(catalog: &Mutex<Catalog>) -> MutexGuard<'_, Catalog> {
    catalog.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Enrichment state of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Completed => "completed",
            PhotoStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhotoStatus::Pending),
            "processing" => Some(PhotoStatus::Processing),
            "completed" => Some(PhotoStatus::Completed),
            "failed" => Some(PhotoStatus::Failed),
            _ => None,
        }
    }

    /// Whether the enrichment queue may pick this photo up.
    pub fn is_enqueueable(&self) -> bool {
        matches!(self, PhotoStatus::Pending | PhotoStatus::Failed)
    }
}

impl std::fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GPS position in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub id: i64,
    pub file_path: String,
    pub taken_at: String,
    pub location: Option<Location>,
    /// Description currently shown to the user.
    pub description_ai: Option<String>,
    /// Description as it was before the first edit of the current edit cycle.
    pub description_original: Option<String>,
    pub is_edited: bool,
    pub status: PhotoStatus,
    pub created_at: String,
}

/// Number of photos in each enrichment state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    /// Photos still waiting on the enrichment queue.
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}
