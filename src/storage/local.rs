//! Local filesystem blob storage

use std::path::{Path, PathBuf};

use super::{BlobStorage, Promotion, StagedPayload, StorageError};

/// Local filesystem blob storage: one flat directory, one file per blob
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, blob_name: &str) -> Result<PathBuf, StorageError> {
        let valid = !blob_name.is_empty()
            && !blob_name.starts_with('.')
            && blob_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidName(blob_name.to_string()));
        }
        Ok(self.root.join(blob_name))
    }
}

#[async_trait::async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn promote(&self, staged: StagedPayload, blob_name: &str) -> Result<Promotion, StorageError> {
        let dest = self.blob_path(blob_name)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io("create", &self.root, e))?;

        let present = tokio::fs::try_exists(&dest)
            .await
            .map_err(|e| StorageError::io("stat", &dest, e))?;
        if present {
            staged.discard().await;
            return Ok(Promotion::AlreadyPresent);
        }

        if tokio::fs::rename(staged.path(), &dest).await.is_ok() {
            staged.into_path();
            return Ok(Promotion::Written);
        }

        // Staging may sit on another filesystem; copy beside the target, then rename
        let partial = self.root.join(format!(".{}.partial", blob_name));
        if let Err(e) = tokio::fs::copy(staged.path(), &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::io("copy", &partial, e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::io("rename", &dest, e));
        }
        staged.discard().await;

        Ok(Promotion::Written)
    }

    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(blob_name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io("stat", &path, e))
    }

    async fn remove(&self, blob_name: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(blob_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io("remove", &path, e)),
        }
    }

    async fn open(&self, blob_name: &str) -> Result<(tokio::fs::File, u64), StorageError> {
        let path = self.blob_path(blob_name)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(blob_name.to_string()))
            }
            Err(e) => return Err(StorageError::io("open", &path, e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::io("stat", &path, e))?
            .len();
        Ok((file, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StagingArea;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_promote_moves_staged_file() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("staging"));
        let storage = LocalBlobStorage::new(temp_dir.path().join("blobs"));

        let staged = staging.stage_bytes("a.txt", None, b"payload").await.unwrap();
        let staged_path = staged.path().to_path_buf();

        let result = storage.promote(staged, "abc123.txt").await.unwrap();
        assert_eq!(result, Promotion::Written);
        assert!(!staged_path.exists());
        assert!(storage.exists("abc123.txt").await.unwrap());

        let on_disk = tokio::fs::read(storage.root().join("abc123.txt")).await.unwrap();
        assert_eq!(on_disk, b"payload");
    }

    #[tokio::test]
    async fn test_promote_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("staging"));
        let storage = LocalBlobStorage::new(temp_dir.path().join("blobs"));

        let first = staging.stage_bytes("a", None, b"same").await.unwrap();
        let second = staging.stage_bytes("b", None, b"same").await.unwrap();
        let second_path = second.path().to_path_buf();

        assert_eq!(storage.promote(first, "feed").await.unwrap(), Promotion::Written);
        assert_eq!(storage.promote(second, "feed").await.unwrap(), Promotion::AlreadyPresent);
        assert!(!second_path.exists());
    }

    #[tokio::test]
    async fn test_promote_reports_stat_failure() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("staging"));
        let storage = LocalBlobStorage::new(temp_dir.path().join("blobs"));

        // Longer than any file name the filesystem accepts
        let name = "a".repeat(300);
        let staged = staging.stage_bytes("a", None, b"bytes").await.unwrap();
        let staged_path = staged.path().to_path_buf();

        match storage.promote(staged, &name).await {
            Err(StorageError::Io { op, .. }) => assert_eq!(op, "stat"),
            other => panic!("expected stat failure, got {:?}", other),
        }
        assert!(!staged_path.exists());
        assert!(matches!(storage.exists(&name).await, Err(StorageError::Io { op: "stat", .. })));
    }

    #[tokio::test]
    async fn test_remove_reports_absence() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("staging"));
        let storage = LocalBlobStorage::new(temp_dir.path().join("blobs"));

        let staged = staging.stage_bytes("a", None, b"bytes").await.unwrap();
        storage.promote(staged, "cafe.bin").await.unwrap();

        assert!(storage.remove("cafe.bin").await.unwrap());
        assert!(!storage.remove("cafe.bin").await.unwrap());
        assert!(matches!(
            storage.open("cafe.bin").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(temp_dir.path().to_path_buf());

        assert!(matches!(
            storage.remove("../etc/passwd").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            storage.exists(".hidden").await,
            Err(StorageError::InvalidName(_))
        ));
    }
}
