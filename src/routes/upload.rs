//! Upload route
//!
//! POST /upload takes a multipart body with one or more payloads under the
//! `files` or `file` field. Each payload is streamed into the staging area
//! before the batch is handed to the upload coordinator.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;

use super::Caller;
use crate::dedup::FileOutcome;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Field names accepted for payloads
const PAYLOAD_FIELDS: [&str; 2] = ["files", "file"];

/// Name used when the client sends none
const UNNAMED_FILE: &str = "upload";

#[derive(Serialize)]
pub struct UploadResponse {
    pub results: Vec<FileOutcome>,
}

/// POST /upload
pub async fn upload_files(
    State(state): State<AppState>,
    Caller(user): Caller,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut payloads = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if !PAYLOAD_FIELDS.contains(&name.as_str()) {
            tracing::debug!(field = %name, "Skipping unrelated multipart field");
            continue;
        }

        let file_name = sanitize_file_name(field.file_name().unwrap_or(""));
        let declared_type = field.content_type().map(str::to_string);

        let mut writer = state.staging().begin(&file_name, declared_type).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read {}: {}", file_name, e)))?
        {
            writer.write_chunk(&chunk).await?;
        }
        let staged = writer.finish().await?;

        tracing::debug!(file_name = %file_name, size = staged.size(), "Payload staged");
        payloads.push(staged);
    }

    if payloads.is_empty() {
        return Err(AppError::BadRequest(
            "no files provided (use field name 'files' or 'file')".to_string(),
        ));
    }

    let results = state.coordinator().upload_batch(&user.id, payloads).await?;

    tracing::info!(
        username = %user.username,
        payloads = results.len(),
        "Upload batch processed"
    );

    Ok(Json(UploadResponse { results }))
}

/// Keep only the final path component of a client-supplied name
fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        UNNAMED_FILE.to_string()
    } else {
        cleaned.to_string()
    }
}
