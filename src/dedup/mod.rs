//! Content-addressed deduplication engine
//!
//! Uploads flow through admission, classification and fingerprinting before
//! the dedup index decides whether the bytes are already stored. Deletions
//! flow through the garbage collector, which removes a blob once its last
//! logical file is gone.

pub mod admission;
pub mod classify;
pub mod coordinator;
pub mod fingerprint;
pub mod gc;
pub mod index;
pub mod locks;
pub mod stats;
pub mod types;

pub use admission::{AdmissionController, QuotaExceeded};
pub use classify::{Classification, TypePolicy};
pub use coordinator::UploadCoordinator;
pub use fingerprint::Fingerprint;
pub use gc::{DeleteReport, GarbageCollector};
pub use index::DedupIndex;
pub use locks::{FingerprintLocks, KeyedLocks, OwnerLocks};
pub use stats::StorageStats;
pub use types::{FileOutcome, UploadError};
