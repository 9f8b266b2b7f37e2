//! Physical blob storage
//!
//! Blobs live flat under one root directory, named by fingerprint plus an
//! extension derived from the detected content type. Files are only ever
//! created (by promoting a staged payload) or removed, never edited in place.

mod local;
mod staging;

pub use local::LocalBlobStorage;
pub use staging::{PayloadWriter, StagedPayload, StagingArea};

use std::path::PathBuf;
use std::sync::Arc;

use crate::dedup::classify::essence;
use crate::dedup::fingerprint::Fingerprint;

/// Storage-specific errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// What promotion did with the staged bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// The staged file now lives at the blob path
    Written,
    /// A blob with this name already existed; the staged copy was discarded
    AlreadyPresent,
}

/// Trait for blob storage backends
#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    /// Move a staged payload to its content-addressed name.
    ///
    /// Idempotent: if the name already exists the content is identical by
    /// construction and the staged copy is dropped.
    async fn promote(&self, staged: StagedPayload, blob_name: &str) -> Result<Promotion, StorageError>;

    /// Check if a blob is physically present
    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError>;

    /// Remove a blob. Returns false if it was already gone.
    async fn remove(&self, blob_name: &str) -> Result<bool, StorageError>;

    /// Open a blob for streaming, returning the handle and its length
    async fn open(&self, blob_name: &str) -> Result<(tokio::fs::File, u64), StorageError>;
}

/// Blob store with a pluggable backend
#[derive(Clone)]
pub struct BlobStore {
    backend: Arc<dyn BlobStorage>,
}

impl BlobStore {
    /// Create with local filesystem storage
    pub fn with_local_storage(root: PathBuf) -> Self {
        Self::with_backend(Arc::new(LocalBlobStorage::new(root)))
    }

    pub fn with_backend(backend: Arc<dyn BlobStorage>) -> Self {
        Self { backend }
    }

    pub async fn promote(&self, staged: StagedPayload, blob_name: &str) -> Result<Promotion, StorageError> {
        self.backend.promote(staged, blob_name).await
    }

    pub async fn exists(&self, blob_name: &str) -> Result<bool, StorageError> {
        self.backend.exists(blob_name).await
    }

    pub async fn remove(&self, blob_name: &str) -> Result<bool, StorageError> {
        self.backend.remove(blob_name).await
    }

    pub async fn open(&self, blob_name: &str) -> Result<(tokio::fs::File, u64), StorageError> {
        self.backend.open(blob_name).await
    }
}

/// Deterministic blob name for a fingerprint and detected content type
pub fn blob_name(fingerprint: &Fingerprint, detected_type: &str) -> String {
    match extension_for(detected_type) {
        Some(ext) => format!("{}.{}", fingerprint, ext),
        None => fingerprint.to_string(),
    }
}

/// File extension for a content type, without the leading dot
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = essence(content_type);
    let preferred = match essence.as_str() {
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/xml" | "application/xml" => Some("xml"),
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "application/x-gzip" => Some("gz"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        "audio/mpeg" => Some("mp3"),
        "video/mp4" => Some("mp4"),
        "application/octet-stream" => None,
        _ => return mime_guess::get_mime_extensions_str(&essence).and_then(|exts| exts.first().copied()),
    };
    preferred
}
