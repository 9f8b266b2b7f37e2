//! File search
//!
//! GET /search?q=report&mime=application/pdf&minSize=1&maxSize=4096
//!            &startDate=2024-01-01&endDate=2024-01-31&uploader=alice
//!
//! Searches the caller's own files plus public files. Without `X-User` only
//! public files are searched.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Caller;
use crate::db::{FileRecord, FileRepository, FileSearch};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Upper bound on returned files
const MAX_LIMIT: i64 = 500;

/// Query parameters for file search
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// File name substring
    pub q: Option<String>,
    /// Exact content type
    pub mime: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// First day included, `YYYY-MM-DD`
    pub start_date: Option<NaiveDate>,
    /// Last day included, `YYYY-MM-DD`
    pub end_date: Option<NaiveDate>,
    pub uploader: Option<String>,
    /// Maximum results (default: 100)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub files: Vec<FileRecord>,
}

/// GET /search
pub async fn search_files(
    State(state): State<AppState>,
    caller: Option<Caller>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let filter = query.into_filter()?;
    let viewer = caller.as_ref().map(|c| c.0.id.as_str());

    let files = FileRepository::new(state.db()).search(viewer, &filter).await?;

    tracing::debug!(viewer = ?viewer, results = files.len(), "File search");

    Ok(Json(SearchResponse {
        count: files.len(),
        files,
    }))
}

impl SearchQuery {
    fn into_filter(self) -> Result<FileSearch> {
        if let (Some(min), Some(max)) = (self.min_size, self.max_size) {
            if min > max {
                return Err(AppError::BadRequest(format!(
                    "minSize ({}) is greater than maxSize ({})",
                    min, max
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(AppError::BadRequest(format!(
                    "startDate ({}) is after endDate ({})",
                    start, end
                )));
            }
        }

        Ok(FileSearch {
            name: non_blank(self.q),
            content_type: non_blank(self.mime),
            min_size: self.min_size,
            max_size: self.max_size,
            created_from: self.start_date.map(day_start),
            // Timestamps sort as text, so "before the next day" covers all of the end day
            created_before: self.end_date.and_then(|d| d.succ_opt()).map(day_start),
            uploader: non_blank(self.uploader),
            limit: self.limit.clamp(1, MAX_LIMIT),
        })
    }
}

fn day_start(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery {
            q: None,
            mime: None,
            min_size: None,
            max_size: None,
            start_date: None,
            end_date: None,
            uploader: None,
            limit: default_limit(),
        }
    }

    #[test]
    fn test_end_date_includes_whole_day() {
        let filter = SearchQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 31),
            ..query()
        }
        .into_filter()
        .unwrap();

        assert_eq!(filter.created_from.as_deref(), Some("2024-01-01"));
        assert_eq!(filter.created_before.as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn test_blank_and_clamped_values() {
        let filter = SearchQuery {
            q: Some("   ".into()),
            uploader: Some(" alice ".into()),
            limit: 100_000,
            ..query()
        }
        .into_filter()
        .unwrap();

        assert_eq!(filter.name, None);
        assert_eq!(filter.uploader.as_deref(), Some("alice"));
        assert_eq!(filter.limit, MAX_LIMIT);
    }

    #[test]
    fn test_inverted_ranges_rejected() {
        let sizes = SearchQuery {
            min_size: Some(10),
            max_size: Some(1),
            ..query()
        };
        assert!(matches!(sizes.into_filter(), Err(AppError::BadRequest(_))));

        let dates = SearchQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..query()
        };
        assert!(matches!(dates.into_filter(), Err(AppError::BadRequest(_))));
    }
}
