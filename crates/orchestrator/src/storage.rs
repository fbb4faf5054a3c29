//! Transient artifact storage.
//!
//! Inputs are read and deleted through [`ArtifactStorage`]; results are
//! written through it.  References are opaque strings; for
//! [`LocalArtifactStorage`] they are filesystem paths.  Only references
//! inside the uploads root count as inputs, and only inputs are ever
//! deleted.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

/// Errors from artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Artifact {0} is outside the uploads directory")]
    OutsideUploads(String),

    #[error("I/O error on {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(reference: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(reference.to_string())
        } else {
            Self::Io {
                reference: reference.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Whether `reference` names an input artifact owned by this storage.
    /// Purely structural; the artifact need not exist yet.
    fn is_input_ref(&self, reference: &str) -> bool;

    /// Whether `reference` points at a readable artifact.
    async fn exists(&self, reference: &str) -> bool;

    async fn read(&self, reference: &str) -> Result<Vec<u8>, StorageError>;

    /// Write `data` to `reference`, creating parent locations as needed.
    async fn write(&self, reference: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete an input artifact. References outside the uploads root are
    /// refused.
    async fn delete(&self, reference: &str) -> Result<(), StorageError>;

    /// Location for the result of processing `original_filename` in a batch.
    fn result_ref_for(&self, batch_id: &str, original_filename: &str) -> String;
}

/// Local-filesystem artifact storage: inputs live under `uploads_dir`,
/// results are written under `results_dir`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStorage {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
}

impl LocalArtifactStorage {
    pub fn new(uploads_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            results_dir: results_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactStorage for LocalArtifactStorage {
    /// Lexical check: the path must sit strictly below `uploads_dir`, spelled
    /// the same way, without any `..` component.
    fn is_input_ref(&self, reference: &str) -> bool {
        let path = Path::new(reference);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        path != self.uploads_dir && path.starts_with(&self.uploads_dir)
    }

    async fn exists(&self, reference: &str) -> bool {
        tokio::fs::metadata(reference)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(reference)
            .await
            .map_err(|e| StorageError::io(reference, e))
    }

    async fn write(&self, reference: &str, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = Path::new(reference).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(reference, e))?;
        }
        tokio::fs::write(reference, data)
            .await
            .map_err(|e| StorageError::io(reference, e))
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        if !self.is_input_ref(reference) {
            return Err(StorageError::OutsideUploads(reference.to_string()));
        }
        tokio::fs::remove_file(reference)
            .await
            .map_err(|e| StorageError::io(reference, e))
    }

    /// `{results_dir}/batch_{batch_id}/{timestamp}_{rand8}_{stem}_processed.png`
    fn result_ref_for(&self, batch_id: &str, original_filename: &str) -> String {
        let stem = Path::new(original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("{timestamp}_{}_{stem}_processed.png", &suffix[..8]);
        self.results_dir
            .join(format!("batch_{batch_id}"))
            .join(filename)
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn storage_in(root: &Path) -> LocalArtifactStorage {
        LocalArtifactStorage::new(root.join("uploads"), root.join("results"))
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let target = dir.path().join("results/a/b/out.png");
        let target = target.to_str().unwrap();

        storage.write(target, b"png").await.unwrap();

        assert!(storage.exists(target).await);
        assert_eq!(storage.read(target).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let missing = dir.path().join("uploads/nope.jpg");
        let missing = missing.to_str().unwrap();

        assert!(!storage.exists(missing).await);
        assert_matches!(storage.read(missing).await, Err(StorageError::NotFound(_)));
        assert_matches!(storage.delete(missing).await, Err(StorageError::NotFound(_)));
    }

    #[test]
    fn only_paths_below_uploads_are_inputs() {
        let storage = LocalArtifactStorage::new("/srv/pixfarm/uploads", "/srv/pixfarm/results");

        assert!(storage.is_input_ref("/srv/pixfarm/uploads/cat.jpg"));
        assert!(storage.is_input_ref("/srv/pixfarm/uploads/user7/cat.jpg"));

        assert!(!storage.is_input_ref("/srv/pixfarm/uploads"));
        assert!(!storage.is_input_ref("/srv/pixfarm/uploads/../secrets.env"));
        assert!(!storage.is_input_ref("/srv/pixfarm/uploads-old/cat.jpg"));
        assert!(!storage.is_input_ref("/srv/pixfarm/results/batch_1/x.png"));
        assert!(!storage.is_input_ref("/etc/passwd"));
        assert!(!storage.is_input_ref("cat.jpg"));
        assert!(!storage.is_input_ref(""));
    }

    #[tokio::test]
    async fn delete_refuses_files_outside_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let outside = dir.path().join("keep.txt");
        std::fs::write(&outside, b"precious").unwrap();

        assert_matches!(
            storage.delete(outside.to_str().unwrap()).await,
            Err(StorageError::OutsideUploads(_))
        );
        assert!(outside.exists());

        let inside = dir.path().join("uploads/cat.jpg");
        std::fs::create_dir_all(inside.parent().unwrap()).unwrap();
        std::fs::write(&inside, b"pixels").unwrap();
        storage.delete(inside.to_str().unwrap()).await.unwrap();
        assert!(!inside.exists());
    }

    #[test]
    fn result_ref_is_scoped_to_batch() {
        let storage = LocalArtifactStorage::new("uploads", "results");
        let reference = storage.result_ref_for("b42", "holiday.photo.jpg");
        let path = Path::new(&reference);

        assert_eq!(path.parent().unwrap(), Path::new("results/batch_b42"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_holiday.photo_processed.png"), "{name}");
    }

    #[test]
    fn result_refs_are_unique() {
        let storage = LocalArtifactStorage::new("uploads", "results");
        assert_ne!(
            storage.result_ref_for("b1", "x.png"),
            storage.result_ref_for("b1", "x.png")
        );
    }
}
