//! Storage statistics routes

use axum::{extract::State, Json};
use serde::Serialize;

use super::Caller;
use crate::dedup::StorageStats;
use crate::error::Result;
use crate::state::AppState;

#[derive(Serialize)]
pub struct UserStatsResponse {
    pub username: String,
    #[serde(flatten)]
    pub stats: StorageStats,
}

/// GET /storage/stats
pub async fn global_stats(State(state): State<AppState>) -> Result<Json<StorageStats>> {
    Ok(Json(StorageStats::global(state.db()).await?))
}

/// GET /stats
pub async fn user_stats(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<UserStatsResponse>> {
    let stats = StorageStats::for_owner(state.db(), &user.id).await?;
    Ok(Json(UserStatsResponse {
        username: user.username,
        stats,
    }))
}
