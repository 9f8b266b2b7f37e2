//! Route modules for the Dedup Vault server

pub mod files;
pub mod folders;
pub mod health;
pub mod realtime;
pub mod search;
pub mod stats;
pub mod upload;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts},
    http::request::Parts,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::{User, UserRepository};
use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the caller's username. Trusted as-is.
pub const USER_HEADER: &str = "x-user";

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config().upload.max_request_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/upload",
            post(upload::upload_files).layer(DefaultBodyLimit::max(body_limit)),
        )
        .nest("/files", files::router())
        .nest("/folders", folders::router())
        .route("/storage/stats", get(stats::global_stats))
        .route("/stats", get(stats::user_stats))
        .route("/search", get(search::search_files))
        .route("/realtime", get(realtime::subscribe))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The user named by the `X-User` header, created on first sight
pub struct Caller(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::Unauthorized("X-User header required".to_string()))?;

        let user = UserRepository::new(state.db()).get_or_create(username).await?;
        Ok(Caller(user))
    }
}
