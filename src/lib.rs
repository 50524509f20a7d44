//! Picscribe: a per-project photo catalog that asks a vision model to
//! describe every imported image and keeps those descriptions searchable.
//!
//! ```no_run
//! use std::sync::Arc;
//! use picscribe::{config::Config, llm::create_provider, open_project};
//!
//! let config = Config::load()?;
//! let provider = Arc::from(create_provider(&config.api));
//! let opened = open_project("/home/me/Pictures/trip", provider)?;
//! opened.project.import_paths(&["/home/me/Pictures/trip/beach.jpg"])?;
//! opened.project.wait_idle();
//! for hit in opened.project.search("sunset")? {
//!     println!("{}: {:?}", hit.photo.file_path, hit.highlighted);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod project;
pub mod scanner;

pub use db::{Photo, PhotoStatus, SearchHit};
pub use error::CatalogError;
pub use project::{open_project, ImportReport, OpenedProject, Project};
