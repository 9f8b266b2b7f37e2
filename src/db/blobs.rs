//! Blob index reads
//!
//! Inserts, reference count updates and deletions go through
//! `dedup::DedupIndex` so they always happen inside a transaction.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;

/// Physical blob record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlobRecord {
    pub fingerprint: String,
    pub storage_path: String,
    pub size: i64,
    pub content_type: String,
    pub ref_count: i64,
    pub created_at: String,
}

/// Blob repository
pub struct BlobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BlobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, fingerprint: &str) -> Result<Option<BlobRecord>> {
        let blob = sqlx::query_as::<_, BlobRecord>(
            r#"
            SELECT fingerprint, storage_path, size, content_type, ref_count, created_at
            FROM blobs
            WHERE fingerprint = ?
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(self.pool)
        .await?;

        Ok(blob)
    }

    /// Blob rows that no logical file points at
    pub async fn list_unreferenced(&self) -> Result<Vec<BlobRecord>> {
        let blobs = sqlx::query_as::<_, BlobRecord>(
            r#"
            SELECT fingerprint, storage_path, size, content_type, ref_count, created_at
            FROM blobs
            WHERE NOT EXISTS (SELECT 1 FROM files WHERE files.fingerprint = blobs.fingerprint)
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(blobs)
    }
}
