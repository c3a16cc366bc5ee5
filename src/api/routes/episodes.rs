//! Episode listing and episode-scoped operations.

use crate::api::state::AppState;
use crate::error::Result;
use crate::model::{Episode, EpisodeStatus};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::parse_date;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Query parameters for listing episodes
#[derive(Deserialize)]
pub struct EpisodesQuery {
    /// Restrict to one feed
    #[serde(default)]
    pub feed_id: Option<String>,
    /// Only episodes with this status
    #[serde(default)]
    pub status: Option<EpisodeStatus>,
    /// Case-insensitive substring match against the title
    #[serde(default)]
    pub search: Option<String>,
    /// Include episodes ignored by filters (default: false)
    #[serde(default)]
    pub show_ignored: Option<bool>,
    /// Earliest published date (ISO-8601 or YYYY-MM-DD)
    #[serde(default)]
    pub start_date: Option<String>,
    /// Latest published date (ISO-8601 or YYYY-MM-DD)
    #[serde(default)]
    pub end_date: Option<String>,
    /// 1-based page number
    #[serde(default)]
    pub page: Option<usize>,
    /// Episodes per page
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// An episode together with the feed it belongs to
#[derive(Serialize, ToSchema)]
pub struct EpisodeItem {
    /// Feed the episode belongs to
    pub feed_id: String,
    /// The episode record
    #[serde(flatten)]
    pub episode: Episode,
}

/// One page of episodes
#[derive(Serialize, ToSchema)]
pub struct EpisodeListResponse {
    /// Episodes, newest first
    pub episodes: Vec<EpisodeItem>,
    /// Total number of matching episodes
    pub total: usize,
    /// Page returned
    pub page: usize,
    /// Page size used
    pub page_size: usize,
}

/// `GET /episodes` - filtered listing across feeds, newest first
pub async fn list_episodes(
    State(state): State<AppState>,
    Query(query): Query<EpisodesQuery>,
) -> Result<Json<EpisodeListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let show_ignored = query.show_ignored.unwrap_or(false);

    let start_date = query
        .start_date
        .as_deref()
        .map(|value| parse_date(value, false))
        .transpose()?;
    let end_date = query
        .end_date
        .as_deref()
        .map(|value| parse_date(value, true))
        .transpose()?;
    let search = query.search.as_deref().map(str::to_lowercase);

    let feed_ids: Vec<String> = match &query.feed_id {
        Some(feed_id) => vec![feed_id.clone()],
        None => state
            .updater
            .all_feed_configs()
            .into_iter()
            .map(|config| config.id)
            .collect(),
    };

    let mut items = Vec::new();
    for feed_id in feed_ids {
        let feed_id_for_item = feed_id.clone();
        state
            .db
            .walk_episodes(&feed_id, |episode| {
                if let Some(status) = query.status {
                    if episode.status != status {
                        return Ok(());
                    }
                } else if episode.status == EpisodeStatus::Ignored && !show_ignored {
                    return Ok(());
                }

                if let Some(search) = &search {
                    if !episode.title.to_lowercase().contains(search) {
                        return Ok(());
                    }
                }
                if let Some(start) = start_date {
                    if episode.pub_date < start {
                        return Ok(());
                    }
                }
                if let Some(end) = end_date {
                    if episode.pub_date > end {
                        return Ok(());
                    }
                }

                items.push(EpisodeItem {
                    feed_id: feed_id_for_item.clone(),
                    episode,
                });
                Ok(())
            })
            .await?;
    }

    items.sort_by(|a, b| b.episode.pub_date.cmp(&a.episode.pub_date));

    let total = items.len();
    let skip = (page - 1).saturating_mul(page_size);
    let episodes: Vec<EpisodeItem> = items.into_iter().skip(skip).take(page_size).collect();

    Ok(Json(EpisodeListResponse {
        episodes,
        total,
        page,
        page_size,
    }))
}

/// `DELETE /episodes/:feed_id/:episode_id`
pub async fn delete_episode(
    State(state): State<AppState>,
    Path((feed_id, episode_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    state.updater.delete_episode(&feed_id, &episode_id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// `POST /episodes/:feed_id/:episode_id/retry`
pub async fn retry_episode(
    State(state): State<AppState>,
    Path((feed_id, episode_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    state.updater.retry_episode(&feed_id, &episode_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// `POST /episodes/:feed_id/:episode_id/block`
pub async fn block_episode(
    State(state): State<AppState>,
    Path((feed_id, episode_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    state.updater.block_episode(&feed_id, &episode_id).await?;
    Ok(Json(serde_json::json!({ "status": "blocked" })))
}
