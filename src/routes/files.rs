//! File routes
//!
//! Endpoints:
//! - GET /files - List the caller's files
//! - GET /files/:id - File metadata (owner, or anyone if public)
//! - PATCH /files/:id - Change visibility or folder (owner only)
//! - DELETE /files/:id - Delete a file (owner only)
//! - GET /files/:id/stats - Per-file statistics
//! - GET /files/:id/download - Stream the file contents

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::Caller;
use crate::db::{BlobRepository, FileRecord, FileRepository, FolderRepository, UpdateFile, User};
use crate::dedup::stats::FileStats;
use crate::dedup::DeleteReport;
use crate::error::{AppError, Result};
use crate::events::{Event, EventKind};
use crate::state::AppState;
use crate::storage::StorageError;

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_files))
        .route("/:id", get(get_file).patch(update_file).delete(delete_file))
        .route("/:id/stats", get(file_stats))
        .route("/:id/download", get(download_file))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub folder_id: Option<String>,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileRecord>,
}

#[derive(Serialize)]
pub struct FileResponse {
    pub file: FileRecord,
}

#[derive(Serialize)]
pub struct UpdateResponse {
    pub status: &'static str,
    pub file: FileRecord,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: DeleteReport,
}

/// GET /files
async fn list_files(
    State(state): State<AppState>,
    Caller(user): Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<FileListResponse>> {
    let files = FileRepository::new(state.db())
        .list_for_owner(&user.id, query.folder_id.as_deref())
        .await?;

    Ok(Json(FileListResponse { files }))
}

/// GET /files/:id
async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Option<Caller>,
) -> Result<Json<FileResponse>> {
    let file = readable_file(&state, &id, caller.as_ref().map(|c| &c.0)).await?;
    Ok(Json(FileResponse { file }))
}

/// PATCH /files/:id
async fn update_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
    Json(update): Json<UpdateFile>,
) -> Result<Json<UpdateResponse>> {
    let files = FileRepository::new(state.db());
    let file = files
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)))?;

    if file.owner_id != user.id {
        return Err(AppError::Forbidden("Only the owner can modify this file".to_string()));
    }

    if let Some(folder_id) = update.folder_id.as_deref().filter(|f| !f.is_empty()) {
        let folder = FolderRepository::new(state.db())
            .get(folder_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Folder not found: {}", folder_id)))?;
        if folder.owner_id != user.id {
            return Err(AppError::Forbidden(
                "Cannot move a file into a folder you don't own".to_string(),
            ));
        }
    }

    let file = files
        .update(&id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)))?;

    Ok(Json(UpdateResponse {
        status: "updated",
        file,
    }))
}

/// DELETE /files/:id
async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<DeleteResponse>> {
    let report = state.collector().delete_file(&id, &user.id).await?;

    Ok(Json(DeleteResponse {
        status: "deleted",
        report,
    }))
}

/// GET /files/:id/stats
async fn file_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Option<Caller>,
) -> Result<Json<FileStats>> {
    let file = readable_file(&state, &id, caller.as_ref().map(|c| &c.0)).await?;
    let ref_count = state.index().live_references(&file.fingerprint).await?;

    Ok(Json(FileStats::new(file, ref_count)))
}

/// GET /files/:id/download
///
/// The blob is streamed; a client that disconnects drops the stream and
/// reading stops.
async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Option<Caller>,
) -> Result<Response> {
    let file = readable_file(&state, &id, caller.as_ref().map(|c| &c.0)).await?;

    let blob = BlobRepository::new(state.db())
        .get(&file.fingerprint)
        .await?
        .ok_or_else(|| AppError::Internal(format!("No blob indexed for file {}", id)))?;

    let (handle, len) = match state.store().open(&blob.storage_path).await {
        Ok(opened) => opened,
        Err(StorageError::NotFound(name)) => {
            tracing::error!(
                file_id = %id,
                fingerprint = %file.fingerprint,
                storage_path = %name,
                "Indexed blob missing from storage"
            );
            if let Err(e) = state
                .index()
                .record_reconciliation(&file.fingerprint, &name, "blob missing on download")
                .await
            {
                tracing::error!(error = %e, "Failed to record reconciliation task");
            }
            return Err(StorageError::NotFound(name).into());
        }
        Err(e) => return Err(e.into()),
    };

    let downloads = FileRepository::new(state.db())
        .increment_downloads(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)))?;
    state
        .events()
        .publish(Event::new(EventKind::Download, &id, downloads));

    tracing::debug!(file_id = %id, downloads, size = len, "Serving download");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &file.content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.file_name.replace('"', "")),
        )
        .body(Body::from_stream(ReaderStream::new(handle)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Load a file the caller may read: their own, or any public file
async fn readable_file(state: &AppState, id: &str, caller: Option<&User>) -> Result<FileRecord> {
    let file = FileRepository::new(state.db())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)))?;

    if file.public {
        return Ok(file);
    }

    match caller {
        None => Err(AppError::Unauthorized(
            "X-User required to view private file".to_string(),
        )),
        Some(user) if user.id == file.owner_id => Ok(file),
        Some(_) => Err(AppError::Forbidden(
            "You do not have access to this file".to_string(),
        )),
    }
}
