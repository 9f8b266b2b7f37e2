//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Callers, created on first sight
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_folders_owner ON folders(owner_id);

-- Dedup index: one row per physical blob
CREATE TABLE IF NOT EXISTS blobs (
    fingerprint TEXT PRIMARY KEY,
    storage_path TEXT NOT NULL,
    size INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    -- Cache of COUNT(files WHERE fingerprint = blobs.fingerprint)
    ref_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Logical files: many rows may share one blob
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    fingerprint TEXT NOT NULL REFERENCES blobs(fingerprint),
    owner_id TEXT NOT NULL REFERENCES users(id),
    folder_id TEXT REFERENCES folders(id) ON DELETE SET NULL,
    public INTEGER NOT NULL DEFAULT 0,
    download_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint);
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);
CREATE INDEX IF NOT EXISTS idx_files_folder ON files(folder_id);

-- Physical objects whose state disagrees with the index
CREATE TABLE IF NOT EXISTS reconciliation_tasks (
    id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    reason TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reconciliation_open ON reconciliation_tasks(resolved);
"#;
