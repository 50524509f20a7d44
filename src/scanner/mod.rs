pub mod discovery;
pub mod metadata;

use anyhow::Result;
use std::path::PathBuf;

use crate::config::ImportConfig;

pub use discovery::discover_images;
pub use metadata::{extract_metadata, PhotoMetadata};

/// File extensions the catalog accepts, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Something that yields candidate image paths for an import, such as a
/// folder on disk or a list the user picked.
pub trait ImportSource {
    fn candidates(&self) -> Result<Vec<PathBuf>>;
}

/// Every supported image directly inside a folder (or below it, if recursive).
#[derive(Debug, Clone)]
pub struct FolderSource {
    pub directory: PathBuf,
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl FolderSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_config(directory, &ImportConfig::default())
    }

    /// Configured extensions the catalog cannot import are left out.
    pub fn with_config(directory: impl Into<PathBuf>, config: &ImportConfig) -> Self {
        Self {
            directory: directory.into(),
            extensions: config.effective_extensions(),
            recursive: config.recursive,
        }
    }
}

impl ImportSource for FolderSource {
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        discover_images(&self.directory, &self.extensions, self.recursive)
    }
}

/// An explicit list of files, kept as given.
#[derive(Debug, Clone, Default)]
pub struct PathListSource {
    pub paths: Vec<PathBuf>,
}

impl PathListSource {
    pub fn new(paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl ImportSource for PathListSource {
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        Ok(self.paths.clone())
    }
}
