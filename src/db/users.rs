//! User database operations

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::now_rfc3339;
use crate::error::{AppError, Result};

/// User record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: String,
}

/// User repository
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Look up a user by name, creating it on first sight
    pub async fn get_or_create(&self, username: &str) -> Result<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(username) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(username)
        .bind(now_rfc3339())
        .execute(self.pool)
        .await?;

        self.get_by_username(username)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created user".to_string()))
    }
}
