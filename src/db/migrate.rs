//! Additive schema evolution for project catalogs.
//!
//! Runs on every open. Missing columns are appended with safe defaults, data
//! that older releases left empty is back-filled, and the full-text index is
//! created (and populated) if the catalog predates it. All of it happens in
//! one transaction so a half-migrated catalog is never left behind.

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use super::schema::{ADDED_COLUMNS, FTS_SCHEMA, INDEXES, SCHEMA, SCHEMA_VERSION};

/// Bring the catalog at `conn` up to [`SCHEMA_VERSION`]. Idempotent.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;

    let found_version: i32 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    tx.execute_batch(SCHEMA)?;

    let existing = table_columns(&tx, "photos")?;
    for (name, declaration) in ADDED_COLUMNS {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        info!(column = name, "Adding missing catalog column");
        tx.execute_batch(&format!("ALTER TABLE photos ADD COLUMN {} {}", name, declaration))?;

        if *name == "status" {
            // Rows described before status tracking existed are already done.
            tx.execute(
                r#"
                UPDATE photos SET status = 'completed'
                WHERE description_ai IS NOT NULL AND TRIM(description_ai) != ''
                "#,
                [],
            )?;
        }
    }

    tx.execute(
        "UPDATE photos SET created_at = strftime('%Y-%m-%dT%H:%M:%f', 'now') WHERE created_at IS NULL",
        [],
    )?;
    tx.execute(
        "UPDATE photos SET taken_at = REPLACE(SUBSTR(created_at, 1, 19), ' ', 'T') WHERE taken_at IS NULL",
        [],
    )?;

    tx.execute_batch(INDEXES)?;

    let index_existed = table_exists(&tx, "photos_fts")?;
    tx.execute_batch(FTS_SCHEMA)?;
    if !index_existed {
        let backfilled = tx.execute(
            r#"
            INSERT INTO photos_fts (photo_id, description)
            SELECT id, description_ai FROM photos
            WHERE description_ai IS NOT NULL AND TRIM(description_ai) != ''
            "#,
            [],
        )?;
        if backfilled > 0 {
            info!(rows = backfilled, "Back-filled search index from existing descriptions");
        }
    }

    if found_version != SCHEMA_VERSION {
        debug!(from = found_version, to = SCHEMA_VERSION, "Catalog schema version updated");
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    tx.commit()
}

fn table_columns(tx: &Transaction, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn table_exists(tx: &Transaction, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
