//! Upload coordinator
//!
//! Drives each admitted payload through classification, fingerprinting and
//! the dedup decision. Payloads are independent: one failing never undoes
//! another. Everything from the index lookup to the index commit happens
//! under the fingerprint's lock, so identical content uploaded concurrently
//! always ends up as one blob with an exact reference count. Batches of the
//! same owner run one at a time, from quota admission to their last commit,
//! so two concurrent batches can never both be admitted against the same
//! usage.

use std::sync::Arc;

use super::admission::AdmissionController;
use super::classify::{read_sample, Classification, TypePolicy};
use super::fingerprint::{fingerprint_file, Fingerprint};
use super::index::{BlobEntry, DedupIndex, NewFile};
use super::locks::{FingerprintLocks, OwnerLocks};
use super::types::{FileOutcome, UploadError};
use crate::db::BlobRecord;
use crate::error::Result;
use crate::events::{Event, EventHub, EventKind};
use crate::storage::{blob_name, BlobStore, Promotion, StagedPayload, StorageError};

/// Reason reported for a declared/detected type mismatch
pub const MIME_MISMATCH: &str = "MIME mismatch";

/// Orchestrates upload batches
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    index: DedupIndex,
    store: BlobStore,
    locks: FingerprintLocks,
    owners: OwnerLocks,
    policy: TypePolicy,
    admission: AdmissionController,
    events: EventHub,
}

impl UploadCoordinator {
    pub fn new(
        index: DedupIndex,
        store: BlobStore,
        locks: FingerprintLocks,
        policy: TypePolicy,
        admission: AdmissionController,
        events: EventHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                index,
                store,
                locks,
                owners: OwnerLocks::new(),
                policy,
                admission,
                events,
            }),
        }
    }

    /// Admit a batch and process its payloads in order.
    ///
    /// Fails as a whole only when the batch does not fit the owner's quota;
    /// in that case the staged payloads are dropped untouched. Otherwise
    /// every payload gets an outcome, in submission order.
    pub async fn upload_batch(&self, owner_id: &str, payloads: Vec<StagedPayload>) -> Result<Vec<FileOutcome>> {
        let _owner_guard = self.inner.owners.acquire(&owner_id.to_string()).await;

        let sizes: Vec<u64> = payloads.iter().map(StagedPayload::size).collect();
        let admission = self.inner.admission.admit(owner_id, &sizes).await?;
        tracing::debug!(
            owner_id = %owner_id,
            payloads = sizes.len(),
            remaining = admission.remaining_after(),
            "Processing admitted batch"
        );

        let mut outcomes = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let filename = payload.file_name().to_string();
            let inner = self.inner.clone();
            let owner_id = owner_id.to_string();

            // A detached task finishes the commit even if the request goes away
            let outcome = match tokio::spawn(async move { inner.process(&owner_id, payload).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(filename = %filename, error = %e, "Upload task failed");
                    FileOutcome::Error {
                        filename,
                        kind: "internal".to_string(),
                        error: "upload task failed".to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

impl Inner {
    async fn process(&self, owner_id: &str, staged: StagedPayload) -> FileOutcome {
        let filename = staged.file_name().to_string();
        match self.store_payload(owner_id, staged).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(filename = %filename, kind = e.kind(), error = %e, "Upload failed");
                FileOutcome::failed(filename, &e)
            }
        }
    }

    async fn store_payload(&self, owner_id: &str, staged: StagedPayload) -> std::result::Result<FileOutcome, UploadError> {
        let filename = staged.file_name().to_string();

        let sample = read_sample(staged.path())
            .await
            .map_err(|e| StorageError::io("read", staged.path(), e))?;
        let classification = self.policy.classify(staged.declared_type(), &sample);

        if !classification.accepted {
            tracing::info!(
                filename = %filename,
                declared = %classification.declared,
                detected = %classification.detected,
                "Rejected upload with mismatched content type"
            );
            staged.discard().await;
            return Ok(FileOutcome::Rejected {
                filename,
                reason: MIME_MISMATCH.to_string(),
                declared: classification.declared,
                detected: classification.detected,
            });
        }

        let fingerprint = fingerprint_file(staged.path())
            .await
            .map_err(|e| StorageError::io("read", staged.path(), e))?;

        let _guard = self.locks.acquire(&fingerprint).await;

        match self.index.lookup(&fingerprint).await? {
            Some(existing) => self.link_existing(owner_id, staged, &fingerprint, &classification, existing).await,
            None => self.store_new(owner_id, staged, &fingerprint, &classification).await,
        }
    }

    /// Dedup hit: add a logical file pointing at the stored blob
    async fn link_existing(
        &self,
        owner_id: &str,
        staged: StagedPayload,
        fingerprint: &Fingerprint,
        classification: &Classification,
        existing: BlobRecord,
    ) -> std::result::Result<FileOutcome, UploadError> {
        let filename = staged.file_name().to_string();
        let size = staged.size();
        let content_type = declared_or_detected(&staged, classification);

        if self.store.exists(&existing.storage_path).await? {
            staged.discard().await;
        } else {
            // The upload carries the same bytes, so it can stand in for the lost blob
            tracing::warn!(
                fingerprint = %fingerprint,
                storage_path = %existing.storage_path,
                "Indexed blob missing from storage, restoring it from upload"
            );
            self.store.promote(staged, &existing.storage_path).await?;

            match self.index.resolve_reconciliation(fingerprint.as_str()).await {
                Ok(0) => {}
                Ok(closed) => tracing::info!(fingerprint = %fingerprint, closed, "Closed reconciliation tasks for restored blob"),
                Err(e) => tracing::warn!(fingerprint = %fingerprint, error = %e, "Failed to close reconciliation tasks"),
            }
        }

        let attached = self
            .index
            .attach(
                &NewFile {
                    owner_id,
                    file_name: &filename,
                    content_type: &content_type,
                    size,
                },
                &BlobEntry {
                    fingerprint,
                    storage_path: &existing.storage_path,
                    size: existing.size.max(0) as u64,
                    content_type: &existing.content_type,
                },
            )
            .await?;

        tracing::info!(
            file_id = %attached.file_id,
            fingerprint = %fingerprint,
            size,
            ref_count = attached.ref_count,
            "Deduplicated upload"
        );
        self.events
            .publish(Event::new(EventKind::Dedup, &attached.file_id, attached.ref_count));

        Ok(FileOutcome::Deduped {
            filename,
            file_id: attached.file_id,
            fingerprint: fingerprint.to_string(),
            size,
            ref_count: attached.ref_count,
        })
    }

    /// New content: promote the staged payload, then index it
    async fn store_new(
        &self,
        owner_id: &str,
        staged: StagedPayload,
        fingerprint: &Fingerprint,
        classification: &Classification,
    ) -> std::result::Result<FileOutcome, UploadError> {
        let filename = staged.file_name().to_string();
        let size = staged.size();
        let content_type = declared_or_detected(&staged, classification);
        let name = blob_name(fingerprint, &classification.detected);

        let promotion = self.store.promote(staged, &name).await?;

        let attached = self
            .index
            .attach(
                &NewFile {
                    owner_id,
                    file_name: &filename,
                    content_type: &content_type,
                    size,
                },
                &BlobEntry {
                    fingerprint,
                    storage_path: &name,
                    size,
                    content_type: &classification.detected,
                },
            )
            .await;

        let attached = match attached {
            Ok(attached) => attached,
            Err(e) => {
                if promotion == Promotion::Written {
                    self.remove_unindexed_blob(fingerprint, &name).await;
                }
                return Err(e.into());
            }
        };

        if !attached.created_blob {
            // Another writer indexed the same content between lookup and attach
            self.events
                .publish(Event::new(EventKind::Dedup, &attached.file_id, attached.ref_count));
            return Ok(FileOutcome::Deduped {
                filename,
                file_id: attached.file_id,
                fingerprint: fingerprint.to_string(),
                size,
                ref_count: attached.ref_count,
            });
        }

        tracing::info!(
            file_id = %attached.file_id,
            fingerprint = %fingerprint,
            size,
            storage_path = %name,
            "Stored new blob"
        );
        self.events
            .publish(Event::new(EventKind::Upload, &attached.file_id, attached.ref_count));

        Ok(FileOutcome::Uploaded {
            filename,
            file_id: attached.file_id,
            fingerprint: fingerprint.to_string(),
            size,
        })
    }

    /// Compensate a failed index insert by deleting the blob just written
    async fn remove_unindexed_blob(&self, fingerprint: &Fingerprint, name: &str) {
        match self.store.remove(name).await {
            Ok(_) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    storage_path = %name,
                    "Removed blob after failed index update"
                );
            }
            Err(e) => {
                tracing::error!(
                    fingerprint = %fingerprint,
                    storage_path = %name,
                    error = %e,
                    "Failed to remove unindexed blob"
                );
                if let Err(e) = self
                    .index
                    .record_reconciliation(fingerprint.as_str(), name, "unindexed blob left after failed upload")
                    .await
                {
                    tracing::error!(fingerprint = %fingerprint, error = %e, "Failed to record reconciliation task");
                }
            }
        }
    }
}

/// Content type stored on the logical file
fn declared_or_detected(staged: &StagedPayload, classification: &Classification) -> String {
    staged
        .declared_type()
        .map(str::to_string)
        .unwrap_or_else(|| classification.detected.clone())
}
