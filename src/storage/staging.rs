//! Staging area for in-flight payloads
//!
//! A payload is streamed to a uniquely named `.part` file before anything
//! else happens to it. An unconsumed [`StagedPayload`] deletes its file when
//! dropped, so a cancelled request never leaves staging debris behind.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::StorageError;

/// Directory holding staged payloads
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory if needed
    pub async fn ensure(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io("create", &self.dir, e))
    }

    /// Start staging a payload
    pub async fn begin(
        &self,
        file_name: &str,
        declared_type: Option<String>,
    ) -> Result<PayloadWriter, StorageError> {
        self.ensure().await?;

        let path = self.dir.join(format!("{}.part", Uuid::new_v4()));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StorageError::io("create", &path, e))?;

        Ok(PayloadWriter {
            file,
            payload: StagedPayload {
                file_name: file_name.to_string(),
                declared_type,
                size: 0,
                path,
                armed: true,
            },
        })
    }

    /// Stage an in-memory payload in one go
    pub async fn stage_bytes(
        &self,
        file_name: &str,
        declared_type: Option<String>,
        data: &[u8],
    ) -> Result<StagedPayload, StorageError> {
        let mut writer = self.begin(file_name, declared_type).await?;
        writer.write_chunk(data).await?;
        writer.finish().await
    }
}

/// Writer for a payload being staged
pub struct PayloadWriter {
    file: tokio::fs::File,
    payload: StagedPayload,
}

impl PayloadWriter {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| StorageError::io("write", &self.payload.path, e))?;
        self.payload.size += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.payload.size
    }

    /// Flush to disk and hand over the staged payload
    pub async fn finish(self) -> Result<StagedPayload, StorageError> {
        let PayloadWriter { mut file, payload } = self;
        file.flush()
            .await
            .map_err(|e| StorageError::io("flush", &payload.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io("sync", &payload.path, e))?;
        Ok(payload)
    }
}

/// A fully received payload sitting in the staging area
#[derive(Debug)]
pub struct StagedPayload {
    file_name: String,
    declared_type: Option<String>,
    size: u64,
    path: PathBuf,
    armed: bool,
}

impl StagedPayload {
    /// Display name supplied by the client
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Content type declared by the client, if any
    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Bytes actually received
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up ownership of the file on disk; it will no longer be deleted on drop
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Delete the staged file
    pub async fn discard(mut self) {
        self.armed = false;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to discard staged payload");
            }
        }
    }
}

impl Drop for StagedPayload {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stage_counts_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("staging"));

        let mut writer = staging.begin("notes.txt", Some("text/plain".into())).await.unwrap();
        writer.write_chunk(b"Hello, ").await.unwrap();
        writer.write_chunk(b"World!").await.unwrap();
        assert_eq!(writer.bytes_written(), 13);

        let payload = writer.finish().await.unwrap();
        assert_eq!(payload.size(), 13);
        assert_eq!(payload.file_name(), "notes.txt");
        assert_eq!(tokio::fs::read(payload.path()).await.unwrap(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_drop_removes_staged_file() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().to_path_buf());

        let payload = staging.stage_bytes("a.bin", None, b"data").await.unwrap();
        let path = payload.path().to_path_buf();
        assert!(path.exists());

        drop(payload);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_abandoned_writer_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().to_path_buf());

        let mut writer = staging.begin("partial.bin", None).await.unwrap();
        writer.write_chunk(b"half a file").await.unwrap();
        drop(writer);

        let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_path_keeps_file() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::new(temp_dir.path().to_path_buf());

        let payload = staging.stage_bytes("keep.bin", None, b"data").await.unwrap();
        let path = payload.into_path();
        assert!(path.exists());
    }

    #[test]
    fn test_blank_declared_type_is_none() {
        let payload = StagedPayload {
            file_name: "x".into(),
            declared_type: Some("  ".into()),
            size: 0,
            path: PathBuf::from("/nonexistent/x.part"),
            armed: false,
        };
        assert_eq!(payload.declared_type(), None);
    }
}
