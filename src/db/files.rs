//! Logical file database operations
//!
//! Rows here are created and deleted only through the dedup index, which
//! keeps blob reference counts in step. This repository covers reads and
//! the mutable attributes.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;

/// Logical file record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub fingerprint: String,
    pub owner_id: String,
    pub folder_id: Option<String>,
    pub public: bool,
    pub download_count: i64,
    pub created_at: String,
}

/// Update file request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFile {
    pub public: Option<bool>,
    /// Target folder; an empty string moves the file back to the root
    pub folder_id: Option<String>,
}

/// Filters for a file search. Unset fields do not restrict the result.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    /// Substring of the file name, case-insensitive
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<String>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<String>,
    /// Owner's username, case-insensitive
    pub uploader: Option<String>,
    pub limit: i64,
}

/// File repository
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, file_name, content_type, size, fingerprint, owner_id,
                   folder_id, public, download_count, created_at
            FROM files
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(file)
    }

    /// List a user's files, optionally restricted to one folder
    pub async fn list_for_owner(
        &self,
        owner_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, file_name, content_type, size, fingerprint, owner_id,
                   folder_id, public, download_count, created_at
            FROM files
            WHERE owner_id = ? AND (? IS NULL OR folder_id = ?)
            ORDER BY created_at DESC, file_name ASC
            "#,
        )
        .bind(owner_id)
        .bind(folder_id)
        .bind(folder_id)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Update the mutable attributes of a file
    pub async fn update(&self, id: &str, data: &UpdateFile) -> Result<Option<FileRecord>> {
        let mut set_clauses: Vec<&str> = Vec::new();

        if data.public.is_some() {
            set_clauses.push("public = ?");
        }
        if data.folder_id.is_some() {
            set_clauses.push("folder_id = ?");
        }

        if !set_clauses.is_empty() {
            let query = format!("UPDATE files SET {} WHERE id = ?", set_clauses.join(", "));

            let mut sql_query = sqlx::query(&query);
            if let Some(public) = data.public {
                sql_query = sql_query.bind(public);
            }
            if let Some(ref folder_id) = data.folder_id {
                let folder_id = Some(folder_id.as_str()).filter(|f| !f.is_empty());
                sql_query = sql_query.bind(folder_id);
            }
            sql_query = sql_query.bind(id);

            sql_query.execute(self.pool).await?;
        }

        self.get(id).await
    }

    /// Atomically bump the download counter, returning the new value
    pub async fn increment_downloads(&self, id: &str) -> Result<Option<i64>> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE files SET download_count = download_count + 1 WHERE id = ? RETURNING download_count",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(count)
    }

    /// Search files visible to `viewer_id`: their own files plus public ones.
    ///
    /// Without a viewer only public files match.
    pub async fn search(&self, viewer_id: Option<&str>, filter: &FileSearch) -> Result<Vec<FileRecord>> {
        let name_pattern = filter
            .name
            .as_deref()
            .map(|name| format!("%{}%", escape_like(name)));

        let files = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT f.id, f.file_name, f.content_type, f.size, f.fingerprint, f.owner_id,
                   f.folder_id, f.public, f.download_count, f.created_at
            FROM files f
            JOIN users u ON u.id = f.owner_id
            WHERE (f.public = 1 OR f.owner_id = ?)
              AND (? IS NULL OR f.file_name LIKE ? ESCAPE '\')
              AND (? IS NULL OR f.content_type = ?)
              AND (? IS NULL OR f.size >= ?)
              AND (? IS NULL OR f.size <= ?)
              AND (? IS NULL OR f.created_at >= ?)
              AND (? IS NULL OR f.created_at < ?)
              AND (? IS NULL OR u.username = ? COLLATE NOCASE)
            ORDER BY f.created_at DESC, f.file_name ASC
            LIMIT ?
            "#,
        )
        .bind(viewer_id)
        .bind(&name_pattern)
        .bind(&name_pattern)
        .bind(&filter.content_type)
        .bind(&filter.content_type)
        .bind(filter.min_size)
        .bind(filter.min_size)
        .bind(filter.max_size)
        .bind(filter.max_size)
        .bind(&filter.created_from)
        .bind(&filter.created_from)
        .bind(&filter.created_before)
        .bind(&filter.created_before)
        .bind(&filter.uploader)
        .bind(&filter.uploader)
        .bind(filter.limit)
        .fetch_all(self.pool)
        .await?;

        Ok(files)
    }

    /// Total logical bytes owned by a user
    pub async fn usage_for_owner(&self, owner_id: &str) -> Result<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_one(self.pool)
                .await?;

        Ok(total.max(0) as u64)
    }
}

/// Escape `LIKE` wildcards so user input matches literally
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_file, setup_test_db};
    use crate::db::UserRepository;

    #[tokio::test]
    async fn test_usage_and_listing() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let bob = UserRepository::new(&pool).get_or_create("bob").await.unwrap();
        let repo = FileRepository::new(&pool);

        assert_eq!(repo.usage_for_owner(&alice.id).await.unwrap(), 0);

        insert_file(&pool, &alice.id, "1", 100).await;
        insert_file(&pool, &alice.id, "2", 50).await;
        insert_file(&pool, &bob.id, "3", 7).await;

        assert_eq!(repo.usage_for_owner(&alice.id).await.unwrap(), 150);
        assert_eq!(repo.list_for_owner(&alice.id, None).await.unwrap().len(), 2);
        assert_eq!(repo.list_for_owner(&bob.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_increment_downloads() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        insert_file(&pool, &alice.id, "1", 10).await;
        let repo = FileRepository::new(&pool);

        assert_eq!(repo.increment_downloads("1").await.unwrap(), Some(1));
        assert_eq!(repo.increment_downloads("1").await.unwrap(), Some(2));
        assert_eq!(repo.increment_downloads("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_attributes() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        insert_file(&pool, &alice.id, "1", 10).await;
        let repo = FileRepository::new(&pool);

        let updated = repo
            .update("1", &UpdateFile { public: Some(true), folder_id: None })
            .await
            .unwrap()
            .unwrap();
        assert!(updated.public);
        assert_eq!(updated.size, 10);

        let unchanged = repo.update("1", &UpdateFile::default()).await.unwrap().unwrap();
        assert!(unchanged.public);
    }

    async fn describe(pool: &SqlitePool, id: &str, name: &str, content_type: &str, created_at: &str) {
        sqlx::query("UPDATE files SET file_name = ?, content_type = ?, created_at = ? WHERE id = ?")
            .bind(name)
            .bind(content_type)
            .bind(created_at)
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }

    fn ids(files: &[FileRecord]) -> Vec<&str> {
        let mut ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_search_filters_and_visibility() {
        let (_dir, pool) = setup_test_db().await;
        let alice = UserRepository::new(&pool).get_or_create("alice").await.unwrap();
        let bob = UserRepository::new(&pool).get_or_create("bob").await.unwrap();
        let repo = FileRepository::new(&pool);

        insert_file(&pool, &alice.id, "1", 100).await;
        insert_file(&pool, &alice.id, "2", 5000).await;
        insert_file(&pool, &bob.id, "3", 300).await;
        insert_file(&pool, &bob.id, "4", 400).await;
        describe(&pool, "1", "Quarterly Report.pdf", "application/pdf", "2024-01-10T09:00:00+00:00").await;
        describe(&pool, "2", "holiday.png", "image/png", "2024-02-01T12:00:00+00:00").await;
        describe(&pool, "3", "report_draft.pdf", "application/pdf", "2024-01-15T08:00:00+00:00").await;
        describe(&pool, "4", "secret report.pdf", "application/pdf", "2024-01-20T08:00:00+00:00").await;
        repo.update("3", &UpdateFile { public: Some(true), folder_id: None })
            .await
            .unwrap();

        let all = FileSearch { limit: 100, ..Default::default() };
        assert_eq!(ids(&repo.search(Some(&alice.id), &all).await.unwrap()), vec!["1", "2", "3"]);
        assert_eq!(ids(&repo.search(None, &all).await.unwrap()), vec!["3"]);

        let by_name = FileSearch { name: Some("REPORT".into()), ..all.clone() };
        assert_eq!(ids(&repo.search(Some(&alice.id), &by_name).await.unwrap()), vec!["1", "3"]);

        // Wildcards in the query match literally
        let underscore = FileSearch { name: Some("_".into()), ..all.clone() };
        assert_eq!(ids(&repo.search(Some(&alice.id), &underscore).await.unwrap()), vec!["3"]);

        let sized = FileSearch {
            content_type: Some("application/pdf".into()),
            min_size: Some(200),
            max_size: Some(1000),
            ..all.clone()
        };
        assert_eq!(ids(&repo.search(Some(&alice.id), &sized).await.unwrap()), vec!["3"]);

        let january = FileSearch {
            created_from: Some("2024-01-01".into()),
            created_before: Some("2024-01-11".into()),
            ..all.clone()
        };
        assert_eq!(ids(&repo.search(Some(&alice.id), &january).await.unwrap()), vec!["1"]);

        let by_bob = FileSearch { uploader: Some("BOB".into()), ..all.clone() };
        assert_eq!(ids(&repo.search(Some(&alice.id), &by_bob).await.unwrap()), vec!["3"]);
        assert_eq!(ids(&repo.search(Some(&bob.id), &by_bob).await.unwrap()), vec!["3", "4"]);

        let nobody = FileSearch { uploader: Some("carol".into()), ..all.clone() };
        assert!(repo.search(Some(&alice.id), &nobody).await.unwrap().is_empty());

        let limited = FileSearch { limit: 1, ..all };
        assert_eq!(repo.search(Some(&alice.id), &limited).await.unwrap().len(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
