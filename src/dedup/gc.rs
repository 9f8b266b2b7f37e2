//! Garbage collector for the deletion path
//!
//! Deleting a logical file recounts its fingerprint under the fingerprint
//! lock. The physical blob goes away with the last reference. If that
//! removal fails after the metadata delete committed, the blob is left as a
//! reconciliation task; the metadata is never re-created.

use serde::Serialize;

use super::fingerprint::Fingerprint;
use super::index::{DedupIndex, Detached};
use super::locks::FingerprintLocks;
use crate::db::FileRepository;
use crate::error::{AppError, Result};
use crate::events::{Event, EventHub, EventKind};
use crate::storage::BlobStore;

/// What a delete did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub file_id: String,
    pub fingerprint: String,
    pub remaining_refs: i64,
    pub blob_removed: bool,
}

#[derive(Clone)]
pub struct GarbageCollector {
    index: DedupIndex,
    store: BlobStore,
    locks: FingerprintLocks,
    events: EventHub,
}

impl GarbageCollector {
    pub fn new(index: DedupIndex, store: BlobStore, locks: FingerprintLocks, events: EventHub) -> Self {
        Self {
            index,
            store,
            locks,
            events,
        }
    }

    /// Delete a logical file owned by `requester_id`
    pub async fn delete_file(&self, file_id: &str, requester_id: &str) -> Result<DeleteReport> {
        let file = FileRepository::new(self.index.pool())
            .get(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

        if file.owner_id != requester_id {
            return Err(AppError::Forbidden("Only the owner can delete this file".to_string()));
        }

        let fingerprint = Fingerprint::parse(&file.fingerprint).ok_or_else(|| {
            AppError::Internal(format!("Malformed fingerprint on file {}", file_id))
        })?;

        let _guard = self.locks.acquire(&fingerprint).await;

        // A concurrent delete may have won the race for the lock
        let detached = self
            .index
            .detach(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File not found: {}", file_id)))?;

        let blob_removed = if detached.remaining == 0 {
            self.remove_blob(&detached).await
        } else {
            false
        };

        tracing::info!(
            file_id = %file_id,
            fingerprint = %detached.fingerprint,
            remaining_refs = detached.remaining,
            blob_removed,
            "Deleted file"
        );
        self.events
            .publish(Event::new(EventKind::Delete, file_id, detached.remaining));

        Ok(DeleteReport {
            file_id: file_id.to_string(),
            fingerprint: detached.fingerprint,
            remaining_refs: detached.remaining,
            blob_removed,
        })
    }

    async fn remove_blob(&self, detached: &Detached) -> bool {
        if detached.storage_path.is_empty() {
            tracing::warn!(fingerprint = %detached.fingerprint, "Last reference deleted but no blob row existed");
            return false;
        }

        let reason = match self.store.remove(&detached.storage_path).await {
            Ok(true) => return true,
            Ok(false) => {
                tracing::warn!(
                    fingerprint = %detached.fingerprint,
                    storage_path = %detached.storage_path,
                    "Blob was already missing from storage"
                );
                return false;
            }
            Err(e) => {
                tracing::error!(
                    fingerprint = %detached.fingerprint,
                    storage_path = %detached.storage_path,
                    error = %e,
                    "Failed to remove unreferenced blob"
                );
                format!("blob removal failed: {}", e)
            }
        };

        if let Err(e) = self
            .index
            .record_reconciliation(&detached.fingerprint, &detached.storage_path, &reason)
            .await
        {
            tracing::error!(
                fingerprint = %detached.fingerprint,
                error = %e,
                "Failed to record reconciliation task"
            );
        }
        false
    }
}
