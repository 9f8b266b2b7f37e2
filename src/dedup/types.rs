//! Per-file upload outcomes

use serde::Serialize;

use crate::error::AppError;
use crate::storage::StorageError;

/// Result of processing one payload of an upload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    /// New content, stored as a new blob
    Uploaded {
        filename: String,
        file_id: String,
        fingerprint: String,
        size: u64,
    },
    /// Content already stored; only a logical file was added
    Deduped {
        filename: String,
        file_id: String,
        fingerprint: String,
        size: u64,
        ref_count: i64,
    },
    /// Declared and detected content types disagree
    Rejected {
        filename: String,
        reason: String,
        declared: String,
        detected: String,
    },
    Error {
        filename: String,
        kind: String,
        error: String,
    },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Uploaded { filename, .. }
            | FileOutcome::Deduped { filename, .. }
            | FileOutcome::Rejected { filename, .. }
            | FileOutcome::Error { filename, .. } => filename,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            FileOutcome::Uploaded { .. } => "uploaded",
            FileOutcome::Deduped { .. } => "deduped",
            FileOutcome::Rejected { .. } => "rejected",
            FileOutcome::Error { .. } => "error",
        }
    }

    /// Id of the logical file created for this payload, if any
    pub fn file_id(&self) -> Option<&str> {
        match self {
            FileOutcome::Uploaded { file_id, .. } | FileOutcome::Deduped { file_id, .. } => {
                Some(file_id)
            }
            _ => None,
        }
    }

    pub(crate) fn failed(filename: String, error: &UploadError) -> Self {
        FileOutcome::Error {
            filename,
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

/// Per-file failure classes
///
/// Request-level problems (bad input, quota) fail the whole request before
/// any payload is processed, so only storage and index failures remain here.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("index update failed: {0}")]
    Consistency(String),
}

impl UploadError {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Storage(_) => "storage",
            UploadError::Consistency(_) => "consistency",
        }
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        UploadError::Consistency(e.to_string())
    }
}

impl From<AppError> for UploadError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Storage(e) => UploadError::Storage(e),
            other => UploadError::Consistency(other.to_string()),
        }
    }
}
