//! Folder database operations

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::now_rfc3339;
use crate::error::{AppError, Result};

/// Folder record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

/// Create folder request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFolder {
    pub name: String,
}

/// Folder repository
pub struct FolderRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FolderRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Folder>> {
        let folder = sqlx::query_as::<_, Folder>(
            "SELECT id, name, owner_id, created_at FROM folders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(folder)
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Folder>> {
        let folders = sqlx::query_as::<_, Folder>(
            r#"
            SELECT id, name, owner_id, created_at
            FROM folders
            WHERE owner_id = ?
            ORDER BY name ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;

        Ok(folders)
    }

    pub async fn create(&self, owner_id: &str, data: &CreateFolder) -> Result<Folder> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Folder name must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO folders (id, name, owner_id, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(owner_id)
            .bind(now_rfc3339())
            .execute(self.pool)
            .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created folder".to_string()))
    }
}
