//! Job history endpoints.

use crate::api::state::AppState;
use crate::error::Result;
use crate::model::{HistoryEntry, HistoryFilters, JobStatus, JobType};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::parse_date;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Query parameters for listing history
#[derive(Deserialize)]
pub struct HistoryQuery {
    /// Only entries for this feed
    #[serde(default)]
    pub feed_id: Option<String>,
    /// Only entries of this job type
    #[serde(default)]
    pub job_type: Option<JobType>,
    /// Only entries with this status
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Substring match against feed and episode titles
    #[serde(default)]
    pub search: Option<String>,
    /// Earliest start date (ISO-8601 or YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<String>,
    /// Latest start date (ISO-8601 or YYYY-MM-DD)
    #[serde(default)]
    pub end_date: Option<String>,
    /// 1-based page number
    #[serde(default)]
    pub page: Option<usize>,
    /// Entries per page
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// One page of history entries
#[derive(Serialize, ToSchema)]
pub struct HistoryListResponse {
    /// Entries, newest first
    pub entries: Vec<HistoryEntry>,
    /// Total number of matching entries
    pub total: usize,
    /// Page returned
    pub page: usize,
    /// Page size used
    pub page_size: usize,
}

/// Aggregate history statistics
#[derive(Serialize, ToSchema)]
pub struct HistoryStatsResponse {
    /// Number of stored entries
    pub count: usize,
    /// Oldest entry, if any exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_entry: Option<HistoryEntry>,
}

impl HistoryQuery {
    fn into_filters(self) -> Result<(HistoryFilters, usize, usize)> {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        let start_date = self
            .start_date
            .as_deref()
            .map(|value| parse_date(value, false))
            .transpose()?;
        let end_date = self
            .end_date
            .as_deref()
            .map(|value| parse_date(value, true))
            .transpose()?;

        Ok((
            HistoryFilters {
                feed_id: self.feed_id,
                job_type: self.job_type,
                status: self.status,
                start_date,
                end_date,
                search: self.search,
            },
            page,
            page_size,
        ))
    }
}

/// `GET /history` - filtered listing, newest first
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryListResponse>> {
    let (filters, page, page_size) = query.into_filters()?;
    let (entries, total) = state.db.list_history(&filters, page, page_size).await?;

    Ok(Json(HistoryListResponse {
        entries,
        total,
        page,
        page_size,
    }))
}

/// `GET /history/:id`
pub async fn get_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryEntry>> {
    Ok(Json(state.db.get_history(&id).await?))
}

/// `DELETE /history/:id`
pub async fn delete_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.db.delete_history(&id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// `DELETE /history` - remove every entry
pub async fn delete_all_history(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.db.cleanup_history(0, 0).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// `GET /history/stats`
pub async fn history_stats(
    State(state): State<AppState>,
) -> Result<Json<HistoryStatsResponse>> {
    let (count, oldest_entry) = state.db.history_stats().await?;
    Ok(Json(HistoryStatsResponse {
        count,
        oldest_entry,
    }))
}

/// `POST /history/cleanup` - apply the configured retention policy now
pub async fn cleanup_history(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let history_config = state.config_snapshot().history;
    state
        .history
        .cleanup_old_entries(history_config.retention_days, history_config.max_entries)
        .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
