//! SQLite-backed catalog store.

use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::time::Duration;

use super::migrate::migrate;
use super::search;
use super::{Location, Photo, PhotoStatus, StatusCounts};
use crate::error::{CatalogError, Result};

pub(crate) const PHOTO_COLUMNS: &str = "id, file_path, taken_at, latitude, longitude, \
    description_ai, description_original, is_edited, status, created_at";

/// Newest first; `id` breaks ties between rows inserted in the same millisecond.
pub(crate) const DISPLAY_ORDER: &str = "created_at DESC, id DESC";

pub struct Catalog {
    pub(crate) conn: Connection,
}

impl Catalog {
    /// Open (creating if needed) the catalog file at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrate(&mut conn)?;
        Ok(Self { conn })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, photo_id: i64) -> Result<Option<Photo>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM photos WHERE id = ?", PHOTO_COLUMNS),
            [photo_id],
            |row| row_to_photo(row, 0),
        );
        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<Photo>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM photos ORDER BY {}",
            PHOTO_COLUMNS, DISPLAY_ORDER
        ))?;
        let photos = stmt
            .query_map([], |row| row_to_photo(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(photos)
    }

    pub fn status_of(&self, photo_id: i64) -> Result<Option<PhotoStatus>> {
        let result = self.conn.query_row(
            "SELECT status FROM photos WHERE id = ?",
            [photo_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(status) => Ok(Some(PhotoStatus::from_str(&status).unwrap_or(PhotoStatus::Pending))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids in any of `statuses`, oldest first.
    pub fn ids_with_status(&self, statuses: &[PhotoStatus]) -> Result<Vec<i64>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM photos WHERE status IN ({}) ORDER BY created_at ASC, id ASC",
            placeholders
        ))?;
        let ids = stmt
            .query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn count_by_status(&self) -> Result<StatusCounts> {
        let mut stmt = self.conn.prepare("SELECT status, COUNT(*) FROM photos GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count as usize;
            match PhotoStatus::from_str(&status).unwrap_or(PhotoStatus::Pending) {
                PhotoStatus::Pending => counts.pending += count,
                PhotoStatus::Processing => counts.processing += count,
                PhotoStatus::Completed => counts.completed += count,
                PhotoStatus::Failed => counts.failed += count,
            }
        }
        Ok(counts)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Insert a `pending` row for `path`, or return the existing one.
    /// The bool is true when a row was created.
    pub fn create_or_get(
        &self,
        path: &str,
        taken_at: &str,
        location: Option<Location>,
    ) -> Result<(i64, bool)> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO photos (file_path, taken_at, latitude, longitude, status, created_at)
            VALUES (?, ?, ?, ?, 'pending', strftime('%Y-%m-%dT%H:%M:%f', 'now'))
            "#,
            rusqlite::params![path, taken_at, location.map(|l| l.lat), location.map(|l| l.lon)],
        )?;
        if inserted == 1 {
            return Ok((self.conn.last_insert_rowid(), true));
        }

        let id = self.conn.query_row(
            "SELECT id FROM photos WHERE file_path = ?",
            [path],
            |row| row.get(0),
        )?;
        Ok((id, false))
    }

    // ========================================================================
    // Enrichment state
    // ========================================================================

    pub fn update_status(&self, photo_id: i64, status: PhotoStatus) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE photos SET status = ? WHERE id = ?",
            rusqlite::params![status.as_str(), photo_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::PhotoNotFound(photo_id));
        }
        Ok(())
    }

    /// Move an eligible (`pending`/`failed`) photo to `processing` and return
    /// its path. `None` means someone else already took it or it is done.
    pub fn claim_for_processing(&self, photo_id: i64) -> Result<Option<String>> {
        let result = self.conn.query_row(
            r#"
            UPDATE photos SET status = 'processing'
            WHERE id = ? AND status IN ('pending', 'failed')
            RETURNING file_path
            "#,
            [photo_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(path) => Ok(Some(path)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an enrichment result and index it in one transaction.
    ///
    /// The result replaces whatever `description_ai` holds, including text a
    /// user typed while the photo was still `pending` or `failed`. The edit
    /// flags are left as they are.
    pub fn commit_description(&mut self, photo_id: i64, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CatalogError::EmptyDescription);
        }

        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET description_ai = ?, status = 'completed' WHERE id = ?",
            rusqlite::params![text, photo_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::PhotoNotFound(photo_id));
        }
        search::upsert(&tx, photo_id, text)?;
        tx.commit()?;
        Ok(())
    }

    pub fn mark_failed(&self, photo_id: i64) -> Result<()> {
        self.update_status(photo_id, PhotoStatus::Failed)
    }

    /// Rows left in `processing` by an interrupted run go back to `failed`.
    pub fn sweep_interrupted(&self) -> Result<usize> {
        let swept = self.conn.execute(
            "UPDATE photos SET status = 'failed' WHERE status = 'processing'",
            [],
        )?;
        Ok(swept)
    }

    // ========================================================================
    // Edit / restore
    // ========================================================================

    /// Replace the description with user text. The first edit of a cycle
    /// keeps the previous description in `description_original`.
    pub fn update_description_edit(&mut self, photo_id: i64, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(CatalogError::EmptyDescription);
        }

        let tx = self.conn.transaction()?;
        // Right-hand sides see the pre-update row.
        let updated = tx.execute(
            r#"
            UPDATE photos SET
                description_original = CASE WHEN is_edited = 0 THEN description_ai ELSE description_original END,
                description_ai = ?,
                is_edited = 1
            WHERE id = ?
            "#,
            rusqlite::params![new_text, photo_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::PhotoNotFound(photo_id));
        }
        search::upsert(&tx, photo_id, new_text)?;
        tx.commit()?;
        Ok(())
    }

    /// Put the captured original back and close the edit cycle.
    /// Returns the restored text.
    pub fn restore_original(&mut self, photo_id: i64) -> Result<String> {
        let tx = self.conn.transaction()?;
        let row = tx.query_row(
            "SELECT is_edited, description_original FROM photos WHERE id = ?",
            [photo_id],
            |row| Ok((row.get::<_, bool>(0)?, row.get::<_, Option<String>>(1)?)),
        );
        let original = match row {
            Ok((true, Some(original))) => original,
            Ok(_) => return Err(CatalogError::NoOriginalToRestore(photo_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(CatalogError::PhotoNotFound(photo_id))
            }
            Err(e) => return Err(e.into()),
        };

        tx.execute(
            r#"
            UPDATE photos SET
                description_ai = description_original,
                description_original = NULL,
                is_edited = 0
            WHERE id = ?
            "#,
            [photo_id],
        )?;
        search::upsert(&tx, photo_id, &original)?;
        tx.commit()?;
        Ok(original)
    }
}

/// Map a row selected with [`PHOTO_COLUMNS`] starting at column `offset`.
pub(crate) fn row_to_photo(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Photo> {
    let latitude: Option<f64> = row.get(offset + 3)?;
    let longitude: Option<f64> = row.get(offset + 4)?;
    let status: String = row.get(offset + 8)?;
    Ok(Photo {
        id: row.get(offset)?,
        file_path: row.get(offset + 1)?,
        taken_at: row.get::<_, Option<String>>(offset + 2)?.unwrap_or_default(),
        location: latitude.zip(longitude).map(|(lat, lon)| Location { lat, lon }),
        description_ai: row.get(offset + 5)?,
        description_original: row.get(offset + 6)?,
        is_edited: row.get(offset + 7)?,
        status: PhotoStatus::from_str(&status).unwrap_or(PhotoStatus::Pending),
        created_at: row.get::<_, Option<String>>(offset + 9)?.unwrap_or_default(),
    })
}
