//! Feed management endpoints.

use crate::api::state::AppState;
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::scheduler::cron::CronSchedule;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

/// `GET /feeds` - every hosted feed's configuration
pub async fn list_feeds(State(state): State<AppState>) -> Json<Vec<FeedConfig>> {
    Json(state.updater.all_feed_configs())
}

/// `GET /feeds/:id`
pub async fn get_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
) -> Result<Json<FeedConfig>> {
    state
        .updater
        .feed_config(&feed_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("feed {feed_id:?}")))
}

/// `POST /feeds` - add a feed; it starts updating on its schedule
pub async fn create_feed(
    State(state): State<AppState>,
    Json(mut config): Json<FeedConfig>,
) -> Result<(StatusCode, Json<FeedConfig>)> {
    validate_feed(&config)?;

    if state.updater.feed_config(&config.id).is_some() {
        return Err(Error::AlreadyExists(format!("feed {:?}", config.id)));
    }

    apply_global_cleanup(&state, &mut config);
    state.updater.upsert_feed_config(config.clone());
    state.scheduler.register_feed(&config)?;
    persist_feeds(&state)?;

    Ok((StatusCode::CREATED, Json(config)))
}

/// `PUT /feeds/:id` - replace a feed's configuration and reschedule it
pub async fn update_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
    Json(mut config): Json<FeedConfig>,
) -> Result<Json<FeedConfig>> {
    config.id = feed_id.clone();
    validate_feed(&config)?;

    if state.updater.feed_config(&feed_id).is_none() {
        return Err(Error::NotFound(format!("feed {feed_id:?}")));
    }

    apply_global_cleanup(&state, &mut config);
    state.updater.upsert_feed_config(config.clone());
    state.scheduler.unregister_feed(&feed_id);
    state.scheduler.register_feed(&config)?;
    persist_feeds(&state)?;

    Ok(Json(config))
}

/// `DELETE /feeds/:id` - remove the feed, its episodes and its document
pub async fn delete_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.updater.delete_feed(&feed_id).await?;
    state.scheduler.unregister_feed(&feed_id);
    persist_feeds(&state)?;

    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

/// `POST /feeds/:id/refresh` - asynchronous enqueue of a manual update
pub async fn refresh_feed(
    State(state): State<AppState>,
    Path(feed_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let config = state
        .updater
        .feed_config(&feed_id)
        .ok_or_else(|| Error::NotFound(format!("feed {feed_id:?}")))?;

    state.scheduler.enqueue_refresh(config)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "queued" })),
    ))
}

fn validate_feed(config: &FeedConfig) -> Result<()> {
    if config.id.is_empty() {
        return Err(Error::InvalidInput("feed id is required".into()));
    }
    if config.id.contains('/') || config.id.contains("..") {
        return Err(Error::InvalidInput(format!(
            "feed id {:?} must not contain path separators",
            config.id
        )));
    }
    if config.url.is_empty() {
        return Err(Error::InvalidInput("feed url is required".into()));
    }
    if config.resolve_provider().is_none() {
        return Err(Error::InvalidInput(format!(
            "cannot resolve provider for {:?}; set provider explicitly",
            config.url
        )));
    }
    if !config.cron_schedule.is_empty() {
        CronSchedule::parse(&config.cron_schedule)?;
    }
    Ok(())
}

/// New feeds without their own cleanup policy inherit the global one
fn apply_global_cleanup(state: &AppState, config: &mut FeedConfig) {
    if config.clean.is_none() {
        config.clean = state.config_snapshot().cleanup;
    }
}

/// Rewrite the config file so feed changes survive a restart
fn persist_feeds(state: &AppState) -> Result<()> {
    let snapshot = state.with_config_mut(|config| {
        config.feeds = state
            .updater
            .all_feed_configs()
            .into_iter()
            .map(|feed| (feed.id.clone(), feed))
            .collect();
        config.clone()
    });
    snapshot.save(&state.config_path)
}
