//! Aggregate storage statistics
//!
//! Original bytes count every logical file; deduped bytes count each
//! distinct fingerprint in scope once.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::FileRecord;
use crate::error::Result;

/// Savings achieved by deduplication within a scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub original_bytes: u64,
    pub deduped_bytes: u64,
    pub savings_bytes: u64,
    pub savings_percent: f64,
}

impl StorageStats {
    pub fn from_totals(original: u64, deduped: u64) -> Self {
        let savings = original.saturating_sub(deduped);
        let savings_percent = if original > 0 {
            savings as f64 / original as f64 * 100.0
        } else {
            0.0
        };

        Self {
            original_bytes: original,
            deduped_bytes: deduped,
            savings_bytes: savings,
            savings_percent,
        }
    }

    /// Stats across every user
    pub async fn global(pool: &SqlitePool) -> Result<Self> {
        let (original, deduped): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(size), 0) FROM files),
                (SELECT COALESCE(SUM(min_size), 0) FROM (
                    SELECT MIN(size) AS min_size FROM files GROUP BY fingerprint
                ))
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(Self::from_totals(original.max(0) as u64, deduped.max(0) as u64))
    }

    /// Stats over one user's files
    pub async fn for_owner(pool: &SqlitePool, owner_id: &str) -> Result<Self> {
        let (original, deduped): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COALESCE(SUM(size), 0) FROM files WHERE owner_id = ?),
                (SELECT COALESCE(SUM(min_size), 0) FROM (
                    SELECT MIN(size) AS min_size FROM files WHERE owner_id = ? GROUP BY fingerprint
                ))
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .fetch_one(pool)
        .await?;

        Ok(Self::from_totals(original.max(0) as u64, deduped.max(0) as u64))
    }
}

/// Per-file statistics
#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub file_id: String,
    pub file_name: String,
    pub owner_id: String,
    pub size: i64,
    pub fingerprint: String,
    pub ref_count: i64,
    pub download_count: i64,
    pub public: bool,
    pub created_at: String,
}

impl FileStats {
    pub fn new(file: FileRecord, ref_count: i64) -> Self {
        Self {
            file_id: file.id,
            file_name: file.file_name,
            owner_id: file.owner_id,
            size: file.size,
            fingerprint: file.fingerprint,
            ref_count,
            download_count: file.download_count,
            public: file.public,
            created_at: file.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_file, setup_test_db};
    use crate::db::UserRepository;

    #[test]
    fn test_from_totals() {
        let stats = StorageStats::from_totals(300, 200);
        assert_eq!(stats.savings_bytes, 100);
        assert!((stats.savings_percent - 33.333).abs() < 0.01);

        let empty = StorageStats::from_totals(0, 0);
        assert_eq!(empty.savings_percent, 0.0);
        assert_eq!(empty.savings_bytes, 0);
    }

    #[tokio::test]
    async fn test_shared_fingerprints_counted_once() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let bob = UserRepository::new(&pool).get_or_create("bob").await.unwrap();

        insert_file(&pool, &alice.id, "1", 100).await;
        insert_file(&pool, &bob.id, "2", 40).await;

        // A second logical file on alice's blob, owned by bob
        let fingerprint = format!("{:0>64}", "1");
        sqlx::query(
            "INSERT INTO files (id, file_name, content_type, size, fingerprint, owner_id, created_at)
             VALUES ('3', 'dup.txt', 'text/plain', 100, ?, ?, '2024-01-01T00:00:00Z')",
        )
        .bind(&fingerprint)
        .bind(&bob.id)
        .execute(&pool)
        .await
        .unwrap();

        let global = StorageStats::global(&pool).await.unwrap();
        assert_eq!(global.original_bytes, 240);
        assert_eq!(global.deduped_bytes, 140);
        assert_eq!(global.savings_bytes, 100);
        assert!(global.original_bytes >= global.deduped_bytes);

        let alice_stats = StorageStats::for_owner(&pool, &alice.id).await.unwrap();
        assert_eq!(alice_stats.original_bytes, 100);
        assert_eq!(alice_stats.deduped_bytes, 100);
        assert_eq!(alice_stats.savings_percent, 0.0);
    }

    #[tokio::test]
    async fn test_empty_scope() {
        let (_dir, pool) = setup_test_db().await;
        let stats = StorageStats::global(&pool).await.unwrap();
        assert_eq!(stats, StorageStats::from_totals(0, 0));
    }
}
