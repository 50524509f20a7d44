//! Errors surfaced by the catalog and project layer.
//!
//! Plumbing (config, logging, the vision provider) uses `anyhow` like the rest
//! of the application; these variants exist because callers branch on them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("description must not be empty")]
    EmptyDescription,

    #[error("photo {0} has no original description to restore")]
    NoOriginalToRestore(i64),

    #[error("photo {0} not found")]
    PhotoNotFound(i64),

    #[error("failed to open project at {path}: {source}")]
    ProjectOpen {
        path: PathBuf,
        #[source]
        source: Box<CatalogError>,
    },

    #[error("failed to list import candidates: {0}")]
    ImportSource(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
