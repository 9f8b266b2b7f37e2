//! Dedup index
//!
//! The `blobs` table maps a fingerprint to its physical blob. Every mutation
//! of the `files` table that changes which blobs are referenced runs here,
//! in one transaction together with a recount of the affected fingerprint.
//! The stored `ref_count` is only ever written from a `COUNT(*)`.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::fingerprint::Fingerprint;
use crate::db::{now_rfc3339, BlobRecord, BlobRepository, ReconciliationRepository};
use crate::error::Result;

/// Logical file about to be linked to a blob
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub owner_id: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub size: u64,
}

/// Physical blob a logical file points at
#[derive(Debug, Clone)]
pub struct BlobEntry<'a> {
    pub fingerprint: &'a Fingerprint,
    pub storage_path: &'a str,
    pub size: u64,
    pub content_type: &'a str,
}

/// Result of linking a logical file to a blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached {
    pub file_id: String,
    /// Whether this transaction created the blob row
    pub created_blob: bool,
    /// Live references after the insert
    pub ref_count: i64,
}

/// Result of unlinking a logical file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub fingerprint: String,
    pub storage_path: String,
    /// Live references left; zero means the blob row is gone too
    pub remaining: i64,
}

/// Transactional access to the blob index
#[derive(Clone)]
pub struct DedupIndex {
    pool: SqlitePool,
}

impl DedupIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<BlobRecord>> {
        BlobRepository::new(&self.pool).get(fingerprint.as_str()).await
    }

    /// Insert a logical file, creating the blob row if it does not exist yet.
    ///
    /// Both inserts and the recount commit together or not at all.
    pub async fn attach(&self, file: &NewFile<'_>, blob: &BlobEntry<'_>) -> std::result::Result<Attached, sqlx::Error> {
        let file_id = Uuid::new_v4().to_string();
        let now = now_rfc3339();

        let mut tx = self.pool.begin().await?;

        // A write first, so the transaction holds the write lock from here on
        let created = sqlx::query(
            r#"
            INSERT INTO blobs (fingerprint, storage_path, size, content_type, ref_count, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(blob.fingerprint.as_str())
        .bind(blob.storage_path)
        .bind(blob.size as i64)
        .bind(blob.content_type)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        sqlx::query(
            r#"
            INSERT INTO files (id, file_name, content_type, size, fingerprint, owner_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file_id)
        .bind(file.file_name)
        .bind(file.content_type)
        .bind(file.size as i64)
        .bind(blob.fingerprint.as_str())
        .bind(file.owner_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let ref_count: i64 = sqlx::query_scalar(
            r#"
            UPDATE blobs
            SET ref_count = (SELECT COUNT(*) FROM files WHERE fingerprint = blobs.fingerprint)
            WHERE fingerprint = ?
            RETURNING ref_count
            "#,
        )
        .bind(blob.fingerprint.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Attached {
            file_id,
            created_blob: created,
            ref_count,
        })
    }

    /// Delete a logical file and recount its fingerprint.
    ///
    /// When no references remain the blob row is deleted in the same
    /// transaction; removing the physical object is up to the caller.
    /// Returns `None` if the file does not exist.
    pub async fn detach(&self, file_id: &str) -> std::result::Result<Option<Detached>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let fingerprint: Option<String> =
            sqlx::query_scalar("DELETE FROM files WHERE id = ? RETURNING fingerprint")
                .bind(file_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(fingerprint) = fingerprint else {
            tx.rollback().await?;
            return Ok(None);
        };

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE fingerprint = ?")
            .bind(&fingerprint)
            .fetch_one(&mut *tx)
            .await?;

        let storage_path: Option<String> = if remaining == 0 {
            sqlx::query_scalar("DELETE FROM blobs WHERE fingerprint = ? RETURNING storage_path")
                .bind(&fingerprint)
                .fetch_optional(&mut *tx)
                .await?
        } else {
            sqlx::query_scalar("UPDATE blobs SET ref_count = ? WHERE fingerprint = ? RETURNING storage_path")
                .bind(remaining)
                .bind(&fingerprint)
                .fetch_optional(&mut *tx)
                .await?
        };

        tx.commit().await?;

        Ok(Some(Detached {
            storage_path: storage_path.unwrap_or_default(),
            fingerprint,
            remaining,
        }))
    }

    /// Count the logical files currently pointing at a fingerprint
    pub async fn live_references(&self, fingerprint: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Rewrite every stored counter that disagrees with its live count.
    ///
    /// Returns the number of blobs whose counter was repaired.
    pub async fn reconcile_refcounts(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE blobs
            SET ref_count = (SELECT COUNT(*) FROM files WHERE fingerprint = blobs.fingerprint)
            WHERE ref_count != (SELECT COUNT(*) FROM files WHERE fingerprint = blobs.fingerprint)
            "#,
        )
        .execute(&self.pool)
        .await?;

        let repaired = result.rows_affected();
        if repaired > 0 {
            tracing::warn!(repaired, "Repaired drifted blob reference counts");
        }

        for orphan in BlobRepository::new(&self.pool).list_unreferenced().await? {
            tracing::warn!(
                fingerprint = %orphan.fingerprint,
                storage_path = %orphan.storage_path,
                "Blob row has no live references"
            );
            self.record_reconciliation(&orphan.fingerprint, &orphan.storage_path, "blob has no live references")
                .await?;
        }

        Ok(repaired)
    }

    /// Close ledger entries for a fingerprint whose blob has been restored
    pub async fn resolve_reconciliation(&self, fingerprint: &str) -> Result<u64> {
        ReconciliationRepository::new(&self.pool)
            .resolve_fingerprint(fingerprint)
            .await
    }

    /// Add an entry to the reconciliation ledger
    pub async fn record_reconciliation(&self, fingerprint: &str, storage_path: &str, reason: &str) -> Result<String> {
        ReconciliationRepository::new(&self.pool)
            .record(fingerprint, storage_path, reason)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;
    use crate::db::UserRepository;

    fn new_file<'a>(owner_id: &'a str, size: u64) -> NewFile<'a> {
        NewFile {
            owner_id,
            file_name: "a.txt",
            content_type: "text/plain",
            size,
        }
    }

    #[tokio::test]
    async fn test_attach_creates_then_reuses_blob() {
        let (_dir, pool) = setup_test_db().await;
        let user = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let index = DedupIndex::new(pool.clone());

        let fp = Fingerprint::of_bytes(b"hello");
        let name = format!("{}.txt", fp);
        let blob = BlobEntry {
            fingerprint: &fp,
            storage_path: &name,
            size: 5,
            content_type: "text/plain",
        };

        let first = index.attach(&new_file(&user.id, 5), &blob).await.unwrap();
        assert!(first.created_blob);
        assert_eq!(first.ref_count, 1);

        let second = index.attach(&new_file(&user.id, 5), &blob).await.unwrap();
        assert!(!second.created_blob);
        assert_eq!(second.ref_count, 2);
        assert_ne!(first.file_id, second.file_id);

        let record = index.lookup(&fp).await.unwrap().unwrap();
        assert_eq!(record.ref_count, 2);
        assert_eq!(record.storage_path, name);
    }

    #[tokio::test]
    async fn test_failed_attach_leaves_nothing() {
        let (_dir, pool) = setup_test_db().await;
        let index = DedupIndex::new(pool.clone());

        let fp = Fingerprint::of_bytes(b"orphan");
        let blob = BlobEntry {
            fingerprint: &fp,
            storage_path: fp.as_str(),
            size: 6,
            content_type: "application/octet-stream",
        };

        // Unknown owner violates the foreign key after the blob row was inserted
        let result = index.attach(&new_file("no-such-user", 6), &blob).await;
        assert!(result.is_err());
        assert!(index.lookup(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detach_recounts_and_drops_last_blob_row() {
        let (_dir, pool) = setup_test_db().await;
        let user = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let index = DedupIndex::new(pool.clone());

        let fp = Fingerprint::of_bytes(b"shared");
        let blob = BlobEntry {
            fingerprint: &fp,
            storage_path: fp.as_str(),
            size: 6,
            content_type: "text/plain",
        };
        let a = index.attach(&new_file(&user.id, 6), &blob).await.unwrap();
        let b = index.attach(&new_file(&user.id, 6), &blob).await.unwrap();

        let detached = index.detach(&a.file_id).await.unwrap().unwrap();
        assert_eq!(detached.remaining, 1);
        assert_eq!(index.lookup(&fp).await.unwrap().unwrap().ref_count, 1);

        let detached = index.detach(&b.file_id).await.unwrap().unwrap();
        assert_eq!(detached.remaining, 0);
        assert_eq!(detached.storage_path, fp.as_str());
        assert!(index.lookup(&fp).await.unwrap().is_none());

        assert!(index.detach(&b.file_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() {
        let (_dir, pool) = setup_test_db().await;
        let user = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let index = DedupIndex::new(pool.clone());

        let fp = Fingerprint::of_bytes(b"drift");
        let blob = BlobEntry {
            fingerprint: &fp,
            storage_path: fp.as_str(),
            size: 5,
            content_type: "text/plain",
        };
        index.attach(&new_file(&user.id, 5), &blob).await.unwrap();
        index.attach(&new_file(&user.id, 5), &blob).await.unwrap();

        sqlx::query("UPDATE blobs SET ref_count = 1")
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(index.reconcile_refcounts().await.unwrap(), 1);
        assert_eq!(index.lookup(&fp).await.unwrap().unwrap().ref_count, 2);
        assert_eq!(index.live_references(fp.as_str()).await.unwrap(), 2);
        assert_eq!(index.reconcile_refcounts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_reports_unreferenced_rows() {
        let (_dir, pool) = setup_test_db().await;
        let index = DedupIndex::new(pool.clone());

        sqlx::query(
            "INSERT INTO blobs (fingerprint, storage_path, size, content_type, ref_count, created_at)
             VALUES ('abc', 'abc.txt', 3, 'text/plain', 0, '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        index.reconcile_refcounts().await.unwrap();

        let open = ReconciliationRepository::new(&pool).list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].storage_path, "abc.txt");
    }
}
