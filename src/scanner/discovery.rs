use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Image files under `directory` whose extension is in `extensions`
/// (case-insensitive, without the dot). Only the top level is read unless
/// `recursive` is set.
pub fn discover_images(directory: &Path, extensions: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }

    let mut walker = WalkDir::new(directory).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut images: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();

    // Sort by path for consistent ordering
    images.sort();

    Ok(images)
}

pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext)))
}
