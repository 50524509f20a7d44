//! The open project: one catalog directory, its enrichment queue, and the
//! operations a user interface drives.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::{lock_catalog, Catalog, Photo, PhotoStatus, SearchHit, SharedCatalog, StatusCounts};
use crate::error::{CatalogError, Result};
use crate::llm::{DescriptionProvider, EnrichmentQueue, QueueSnapshot};
use crate::scanner::{discovery::has_extension, extract_metadata, ImportSource, PathListSource, SUPPORTED_EXTENSIONS};

/// Catalog file inside every project directory.
pub const CATALOG_FILE_NAME: &str = "catalog.db";

pub struct Project {
    dir: PathBuf,
    catalog: SharedCatalog,
    queue: EnrichmentQueue,
}

/// A freshly opened project with its listing at open time.
pub struct OpenedProject {
    pub project: Project,
    pub photos: Vec<Photo>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    /// Rows created by this import, in candidate order.
    pub imported: Vec<Photo>,
    /// Ids of candidates that were already in the catalog.
    pub already_present: Vec<i64>,
    /// Candidates that could not be imported, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

/// Open (or create) the project in `dir` and resume enrichment.
pub fn open_project(dir: impl AsRef<Path>, provider: Arc<dyn DescriptionProvider>) -> Result<OpenedProject> {
    Project::open(dir.as_ref(), provider)
}

impl Project {
    /// Create the directory and catalog if needed, migrate, send interrupted
    /// work back to `failed`, and queue everything that still needs a
    /// description, oldest first.
    pub fn open(dir: &Path, provider: Arc<dyn DescriptionProvider>) -> Result<OpenedProject> {
        let opened = Self::load(dir, provider, true)?;
        let outstanding = lock_catalog(&opened.project.catalog)
            .ids_with_status(&[PhotoStatus::Pending, PhotoStatus::Failed])?;
        let queued = opened.project.queue.enqueue(&outstanding);
        info!(dir = %dir.display(), photos = opened.photos.len(), queued, "Project opened");
        Ok(opened)
    }

    /// Open the project for reading and editing only. Nothing is swept or
    /// queued, so no provider call is made until [`enqueue`](Self::enqueue),
    /// [`retry_failed`](Self::retry_failed) or an import asks for one.
    pub fn open_idle(dir: &Path, provider: Arc<dyn DescriptionProvider>) -> Result<OpenedProject> {
        let opened = Self::load(dir, provider, false)?;
        debug!(dir = %dir.display(), photos = opened.photos.len(), "Project opened without enrichment");
        Ok(opened)
    }

    fn load(dir: &Path, provider: Arc<dyn DescriptionProvider>, sweep: bool) -> Result<OpenedProject> {
        let open = || -> Result<(Catalog, Vec<Photo>)> {
            std::fs::create_dir_all(dir)?;
            let catalog = Catalog::open(&dir.join(CATALOG_FILE_NAME))?;

            if sweep {
                let swept = catalog.sweep_interrupted()?;
                if swept > 0 {
                    warn!(count = swept, "Photos interrupted mid-enrichment marked failed");
                }
            }

            let photos = catalog.list()?;
            Ok((catalog, photos))
        };
        let (catalog, photos) = open().map_err(|e| CatalogError::ProjectOpen {
            path: dir.to_path_buf(),
            source: Box::new(e),
        })?;

        let catalog = Arc::new(Mutex::new(catalog));
        let queue = EnrichmentQueue::new(Arc::clone(&catalog), provider);
        Ok(OpenedProject {
            project: Project {
                dir: dir.to_path_buf(),
                catalog,
                queue,
            },
            photos,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.dir.join(CATALOG_FILE_NAME)
    }

    // ========================================================================
    // Import
    // ========================================================================

    /// Add every candidate from `source` that is not in the catalog yet and
    /// queue the new rows. A bad candidate is recorded and skipped.
    pub fn import(&self, source: &dyn ImportSource) -> Result<ImportReport> {
        let candidates = source
            .candidates()
            .map_err(|e| CatalogError::ImportSource(format!("{:#}", e)))?;
        let supported: Vec<String> = SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect();

        let mut report = ImportReport::default();
        for candidate in candidates {
            let path = match candidate.canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "Skipping import candidate");
                    report.failed.push((candidate, e.to_string()));
                    continue;
                }
            };
            if !path.is_file() {
                warn!(path = %path.display(), "Skipping import candidate that is not a file");
                report.failed.push((path, "not a regular file".to_string()));
                continue;
            }
            if !has_extension(&path, &supported) {
                warn!(path = %path.display(), "Skipping unsupported file type");
                report.failed.push((path, "unsupported file type".to_string()));
                continue;
            }

            // EXIF parsing happens before the catalog is locked.
            let metadata = extract_metadata(&path);
            let key = path.to_string_lossy().into_owned();

            let catalog = lock_catalog(&self.catalog);
            let inserted = catalog
                .create_or_get(&key, &metadata.taken_at, metadata.location)
                .and_then(|(id, was_new)| Ok((catalog.get(id)?, id, was_new)));
            drop(catalog);

            match inserted {
                Ok((Some(photo), _, true)) => report.imported.push(photo),
                Ok((_, id, _)) => report.already_present.push(id),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to add photo to catalog");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        let new_ids: Vec<i64> = report.imported.iter().map(|p| p.id).collect();
        self.queue.enqueue(&new_ids);

        info!(
            imported = report.imported.len(),
            already_present = report.already_present.len(),
            failed = report.failed.len(),
            "Import finished"
        );
        Ok(report)
    }

    pub fn import_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ImportReport> {
        let source = PathListSource::new(paths.iter().map(|p| p.as_ref().to_path_buf()));
        self.import(&source)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every photo with its current status, newest first.
    pub fn list_status(&self) -> Result<Vec<Photo>> {
        lock_catalog(&self.catalog).list()
    }

    pub fn get(&self, photo_id: i64) -> Result<Option<Photo>> {
        lock_catalog(&self.catalog).get(photo_id)
    }

    pub fn search(&self, term: &str) -> Result<Vec<SearchHit>> {
        lock_catalog(&self.catalog).search(term)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        lock_catalog(&self.catalog).count_by_status()
    }

    // ========================================================================
    // Edit / restore
    // ========================================================================

    /// Replace a description with user text, keeping the previous one for
    /// [`restore`](Self::restore). Enrichment status is left alone.
    pub fn edit(&self, photo_id: i64, text: &str) -> Result<Photo> {
        let mut catalog = lock_catalog(&self.catalog);
        catalog.update_description_edit(photo_id, text)?;
        info!(photo_id, "Description edited");
        catalog.get(photo_id)?.ok_or(CatalogError::PhotoNotFound(photo_id))
    }

    /// Undo the current edit cycle.
    pub fn restore(&self, photo_id: i64) -> Result<Photo> {
        let mut catalog = lock_catalog(&self.catalog);
        catalog.restore_original(photo_id)?;
        info!(photo_id, "Original description restored");
        catalog.get(photo_id)?.ok_or(CatalogError::PhotoNotFound(photo_id))
    }

    // ========================================================================
    // Enrichment
    // ========================================================================

    /// Queue photos for (re-)description; see [`EnrichmentQueue::enqueue`].
    pub fn enqueue(&self, ids: &[i64]) -> usize {
        self.queue.enqueue(ids)
    }

    /// Queue every photo whose last description attempt failed.
    pub fn retry_failed(&self) -> Result<usize> {
        let failed = lock_catalog(&self.catalog).ids_with_status(&[PhotoStatus::Failed])?;
        Ok(self.queue.enqueue(&failed))
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn wait_idle(&self) {
        self.queue.wait_idle();
    }

    /// Stop enrichment and release the catalog. Photos still queued stay
    /// `pending` and are resumed by the next open.
    pub fn close(self) {
        self.queue.shutdown();
        info!(dir = %self.dir.display(), "Project closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FolderSource;
    use anyhow::bail;
    use crate::config::ImportConfig;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Echo;

    impl DescriptionProvider for Echo {
        fn describe_image(&self, image_path: &Path) -> anyhow::Result<String> {
            let name = image_path.file_stem().unwrap().to_string_lossy();
            Ok(format!("the cats are sleeping in {}", name))
        }

        fn provider_name(&self) -> &'static str {
            "Echo"
        }
    }

    struct Blank;

    impl DescriptionProvider for Blank {
        fn describe_image(&self, _: &Path) -> anyhow::Result<String> {
            Ok(String::new())
        }

        fn provider_name(&self) -> &'static str {
            "Blank"
        }
    }

    struct Unreachable;

    impl DescriptionProvider for Unreachable {
        fn describe_image(&self, _: &Path) -> anyhow::Result<String> {
            bail!("connection refused")
        }

        fn provider_name(&self) -> &'static str {
            "Unreachable"
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl DescriptionProvider for Counting {
        fn describe_image(&self, _: &Path) -> anyhow::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("a described photo".to_string())
        }

        fn provider_name(&self) -> &'static str {
            "Counting"
        }
    }

    fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, b"image bytes").unwrap();
                path.canonicalize().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_open_creates_directory_and_catalog() {
        let root = tempdir().unwrap();
        let dir = root.path().join("trip");

        let opened = open_project(&dir, Arc::new(Echo)).unwrap();
        assert!(opened.photos.is_empty());
        assert!(opened.project.catalog_path().is_file());
        assert_eq!(opened.project.dir(), dir.as_path());
        opened.project.close();
    }

    #[test]
    fn test_open_on_a_file_is_a_project_open_error() {
        let root = tempdir().unwrap();
        let file = root.path().join("not_a_dir");
        fs::write(&file, b"").unwrap();

        let err = open_project(&file, Arc::new(Echo)).err().unwrap();
        assert!(matches!(err, CatalogError::ProjectOpen { .. }));
    }

    #[test]
    fn test_import_three_with_one_existing() {
        let root = tempdir().unwrap();
        let images = write_images(root.path(), &["a.jpg", "b.png", "c.gif"]);
        let project = open_project(root.path().join("project"), Arc::new(Echo)).unwrap().project;

        let first = project.import_paths(&images[..1]).unwrap();
        assert_eq!(first.imported.len(), 1);
        project.wait_idle();
        let existing = project.edit(first.imported[0].id, "my own words").unwrap();

        let report = project.import_paths(&images).unwrap();
        assert_eq!(report.imported.len(), 2);
        assert_eq!(report.already_present, vec![existing.id]);
        assert!(report.failed.is_empty());
        for photo in &report.imported {
            assert_eq!(photo.status, PhotoStatus::Pending);
        }

        project.wait_idle();
        let photos = project.list_status().unwrap();
        assert_eq!(photos.len(), 3);
        assert!(photos.iter().all(|p| p.status == PhotoStatus::Completed));
        assert_eq!(project.get(existing.id).unwrap().unwrap(), existing);
        project.close();
    }

    #[test]
    fn test_import_records_bad_candidates() {
        let root = tempdir().unwrap();
        let images = write_images(root.path(), &["good.jpeg", "notes.txt"]);
        let missing = root.path().join("missing.jpg");
        let project = open_project(root.path().join("project"), Arc::new(Echo)).unwrap().project;

        let report = project
            .import_paths(&[images[0].clone(), images[1].clone(), missing.clone(), root.path().to_path_buf()])
            .unwrap();
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.imported[0].file_path, images[0].to_string_lossy());

        let failed: Vec<&PathBuf> = report.failed.iter().map(|(p, _)| p).collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.contains(&&missing));
        assert!(failed.contains(&&images[1]));
        project.close();
    }

    #[test]
    fn test_import_from_folder() {
        let root = tempdir().unwrap();
        let photos_dir = root.path().join("photos");
        fs::create_dir(&photos_dir).unwrap();
        write_images(&photos_dir, &["one.jpg", "two.webp", "readme.md"]);
        let project = open_project(root.path().join("project"), Arc::new(Echo)).unwrap().project;

        let report = project.import(&FolderSource::new(&photos_dir)).unwrap();
        assert_eq!(report.imported.len(), 2);
        assert!(report.failed.is_empty());

        let err = project.import(&FolderSource::new(root.path().join("nope"))).unwrap_err();
        assert!(matches!(err, CatalogError::ImportSource(_)));
        project.close();
    }

    #[test]
    fn test_empty_result_fails_then_reopen_completes() {
        let root = tempdir().unwrap();
        let images = write_images(root.path(), &["kitchen.jpg"]);
        let dir = root.path().join("project");

        let project = open_project(&dir, Arc::new(Blank)).unwrap().project;
        let id = project.import_paths(&images).unwrap().imported[0].id;
        project.wait_idle();
        let photo = project.get(id).unwrap().unwrap();
        assert_eq!(photo.status, PhotoStatus::Failed);
        assert!(photo.description_ai.is_none());
        assert!(project.search("kitchen").unwrap().is_empty());
        project.close();

        let opened = open_project(&dir, Arc::new(Echo)).unwrap();
        assert_eq!(opened.photos[0].status, PhotoStatus::Failed);
        let project = opened.project;
        project.wait_idle();

        let photo = project.get(id).unwrap().unwrap();
        assert_eq!(photo.status, PhotoStatus::Completed);
        let hits = project.search("kitchen").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(
            hits[0].highlighted.as_deref(),
            Some("the cats are sleeping in <mark>kitchen</mark>")
        );
        project.close();
    }

    #[test]
    fn test_interrupted_processing_is_swept_on_open() {
        let root = tempdir().unwrap();
        let dir = root.path().join("project");
        fs::create_dir_all(&dir).unwrap();

        let id = {
            let catalog = Catalog::open(&dir.join(CATALOG_FILE_NAME)).unwrap();
            let (id, _) = catalog.create_or_get("/gone/a.jpg", "2024-01-01T00:00:00", None).unwrap();
            catalog.claim_for_processing(id).unwrap();
            id
        };

        let opened = open_project(&dir, Arc::new(Unreachable)).unwrap();
        assert_eq!(opened.photos[0].status, PhotoStatus::Failed);
        opened.project.wait_idle();
        assert_eq!(opened.project.get(id).unwrap().unwrap().status, PhotoStatus::Failed);
        opened.project.close();
    }

    #[test]
    fn test_open_idle_leaves_outstanding_work_alone() {
        let root = tempdir().unwrap();
        let dir = root.path().join("project");
        fs::create_dir_all(&dir).unwrap();

        let (pending, processing) = {
            let catalog = Catalog::open(&dir.join(CATALOG_FILE_NAME)).unwrap();
            let (pending, _) = catalog.create_or_get("/gone/a.jpg", "2024-01-01T00:00:00", None).unwrap();
            let (processing, _) = catalog.create_or_get("/gone/b.jpg", "2024-01-01T00:00:00", None).unwrap();
            catalog.claim_for_processing(processing).unwrap();
            (pending, processing)
        };

        let provider = Arc::new(Counting::default());
        let opened = Project::open_idle(&dir, provider.clone()).unwrap();
        assert_eq!(opened.photos.len(), 2);
        let project = opened.project;
        assert!(project.queue_snapshot().is_idle());

        project.edit(pending, "typed by hand").unwrap();
        assert_eq!(project.search("hand").unwrap().len(), 1);
        project.wait_idle();

        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
        assert_eq!(project.get(pending).unwrap().unwrap().status, PhotoStatus::Pending);
        assert_eq!(project.get(processing).unwrap().unwrap().status, PhotoStatus::Processing);
        project.close();
    }

    #[test]
    fn test_folder_import_with_unsupported_configured_extension() {
        let root = tempdir().unwrap();
        let photos_dir = root.path().join("photos");
        fs::create_dir(&photos_dir).unwrap();
        write_images(&photos_dir, &["scan.tiff", "beach.jpg"]);
        let config = ImportConfig {
            extensions: vec!["jpg".to_string(), "tiff".to_string()],
            recursive: false,
        };
        let project = open_project(root.path().join("project"), Arc::new(Echo)).unwrap().project;

        let report = project.import(&FolderSource::with_config(&photos_dir, &config)).unwrap();
        assert_eq!(report.imported.len(), 1);
        assert!(report.imported[0].file_path.ends_with("beach.jpg"));
        assert!(report.failed.is_empty());
        project.close();
    }

    #[test]
    fn test_edit_and_restore() {
        let root = tempdir().unwrap();
        let images = write_images(root.path(), &["porch.jpg"]);
        let project = open_project(root.path().join("project"), Arc::new(Echo)).unwrap().project;
        let id = project.import_paths(&images).unwrap().imported[0].id;
        project.wait_idle();

        assert!(matches!(project.edit(id, "   "), Err(CatalogError::EmptyDescription)));
        assert!(matches!(project.restore(id), Err(CatalogError::NoOriginalToRestore(_))));

        let edited = project.edit(id, "  Grandma's porch, summer 1998 ").unwrap();
        assert_eq!(edited.description_ai.as_deref(), Some("Grandma's porch, summer 1998"));
        assert!(edited.is_edited);
        assert_eq!(edited.status, PhotoStatus::Completed);
        assert_eq!(project.search("grandma").unwrap().len(), 1);
        assert!(project.search("cat sleep").unwrap().is_empty());

        let restored = project.restore(id).unwrap();
        assert_eq!(restored.description_ai.as_deref(), Some("the cats are sleeping in porch"));
        assert!(!restored.is_edited);
        assert!(project.search("grandma").unwrap().is_empty());
        assert_eq!(project.search("cat sleep").unwrap().len(), 1);

        assert!(matches!(project.edit(404, "text"), Err(CatalogError::PhotoNotFound(404))));
        project.close();
    }

    #[test]
    fn test_retry_failed_and_counts() {
        let root = tempdir().unwrap();
        let images = write_images(root.path(), &["a.jpg", "b.jpg"]);
        let project = open_project(root.path().join("project"), Arc::new(Unreachable)).unwrap().project;
        project.import_paths(&images).unwrap();
        project.wait_idle();

        let counts = project.status_counts().unwrap();
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 2);

        assert_eq!(project.retry_failed().unwrap(), 2);
        project.wait_idle();
        assert!(project.queue_snapshot().is_idle());
        assert_eq!(project.status_counts().unwrap().failed, 2);
        project.close();
    }
}
