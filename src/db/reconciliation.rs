//! Reconciliation ledger
//!
//! Records physical objects whose state no longer matches the index: blobs
//! that could not be removed after their last reference went away, and index
//! rows whose blob has gone missing from storage.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::now_rfc3339;
use crate::error::Result;

/// Reconciliation task record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReconciliationTask {
    pub id: String,
    pub fingerprint: String,
    pub storage_path: String,
    pub reason: String,
    pub resolved: bool,
    pub created_at: String,
}

/// Reconciliation repository
pub struct ReconciliationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReconciliationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a task, or return the id of an identical task that is still open
    pub async fn record(&self, fingerprint: &str, storage_path: &str, reason: &str) -> Result<String> {
        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM reconciliation_tasks
            WHERE fingerprint = ? AND storage_path = ? AND reason = ? AND resolved = 0
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .bind(storage_path)
        .bind(reason)
        .fetch_optional(self.pool)
        .await?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO reconciliation_tasks (id, fingerprint, storage_path, reason, resolved, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&id)
        .bind(fingerprint)
        .bind(storage_path)
        .bind(reason)
        .bind(now_rfc3339())
        .execute(self.pool)
        .await?;

        Ok(id)
    }

    pub async fn list_open(&self) -> Result<Vec<ReconciliationTask>> {
        let tasks = sqlx::query_as::<_, ReconciliationTask>(
            r#"
            SELECT id, fingerprint, storage_path, reason, resolved, created_at
            FROM reconciliation_tasks
            WHERE resolved = 0
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(tasks)
    }

    /// Close every open task for a fingerprint whose blob is back in place
    pub async fn resolve_fingerprint(&self, fingerprint: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE reconciliation_tasks SET resolved = 1 WHERE fingerprint = ? AND resolved = 0",
        )
        .bind(fingerprint)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_db;

    #[tokio::test]
    async fn test_record_and_resolve() {
        let (_dir, pool) = setup_test_db().await;
        let repo = ReconciliationRepository::new(&pool);

        let id = repo.record("abc", "abc.txt", "blob removal failed").await.unwrap();
        repo.record("def", "def.txt", "blob missing on download").await.unwrap();
        let open = repo.list_open().await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, id);
        assert_eq!(open[0].storage_path, "abc.txt");

        assert_eq!(repo.resolve_fingerprint("abc").await.unwrap(), 1);
        assert_eq!(repo.resolve_fingerprint("abc").await.unwrap(), 0);
        let open = repo.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].fingerprint, "def");
    }

    #[tokio::test]
    async fn test_repeated_record_reuses_open_task() {
        let (_dir, pool) = setup_test_db().await;
        let repo = ReconciliationRepository::new(&pool);

        let first = repo.record("abc", "abc.txt", "blob has no live references").await.unwrap();
        let second = repo.record("abc", "abc.txt", "blob has no live references").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.list_open().await.unwrap().len(), 1);

        repo.resolve_fingerprint("abc").await.unwrap();
        let third = repo.record("abc", "abc.txt", "blob has no live references").await.unwrap();
        assert_ne!(first, third);
    }
}
