//! Folder routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::Caller;
use crate::db::{CreateFolder, FileRecord, FileRepository, Folder, FolderRepository};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the folders router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_folders).post(create_folder))
        .route("/:id/files", get(list_folder_files))
}

#[derive(Serialize)]
pub struct FolderResponse {
    pub folder: Folder,
}

#[derive(Serialize)]
pub struct FolderListResponse {
    pub folders: Vec<Folder>,
}

#[derive(Serialize)]
pub struct FolderFilesResponse {
    pub files: Vec<FileRecord>,
}

/// POST /folders
async fn create_folder(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(data): Json<CreateFolder>,
) -> Result<Json<FolderResponse>> {
    let folder = FolderRepository::new(state.db()).create(&user.id, &data).await?;
    tracing::debug!(folder_id = %folder.id, owner = %user.username, "Folder created");
    Ok(Json(FolderResponse { folder }))
}

/// GET /folders
async fn list_folders(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<FolderListResponse>> {
    let folders = FolderRepository::new(state.db()).list_for_owner(&user.id).await?;
    Ok(Json(FolderListResponse { folders }))
}

/// GET /folders/:id/files
async fn list_folder_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<FolderFilesResponse>> {
    let folder = FolderRepository::new(state.db())
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Folder not found: {}", id)))?;

    if folder.owner_id != user.id {
        return Err(AppError::Forbidden("You do not own this folder".to_string()));
    }

    let files = FileRepository::new(state.db())
        .list_for_owner(&user.id, Some(&folder.id))
        .await?;
    Ok(Json(FolderFilesResponse { files }))
}
