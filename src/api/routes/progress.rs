//! Live download progress: one-shot snapshots and the SSE stream.

use crate::api::state::AppState;
use crate::progress::{EpisodeProgress, FeedProgress, Tracker};
use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt};
use utoipa::ToSchema;

/// Interval between SSE frames
const STREAM_INTERVAL: Duration = Duration::from_millis(500);

/// Snapshot of all current progress
#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    /// Running feed updates, keyed by feed ID
    pub feeds: HashMap<String, FeedProgress>,
    /// In-flight episode downloads
    pub episodes: Vec<EpisodeProgress>,
}

/// Optional feed filter for progress queries
#[derive(Deserialize)]
pub struct ProgressQuery {
    /// Restrict the snapshot to one feed
    #[serde(default)]
    pub feed_id: Option<String>,
}

fn snapshot(tracker: &Tracker, feed_id: Option<&str>) -> ProgressResponse {
    match feed_id {
        Some(feed_id) => {
            let mut feeds = HashMap::new();
            if let Some(feed) = tracker.get_feed_progress(feed_id) {
                feeds.insert(feed_id.to_string(), feed);
            }
            ProgressResponse {
                feeds,
                episodes: tracker.get_episodes_for_feed(feed_id),
            }
        }
        None => ProgressResponse {
            feeds: tracker.get_all_feed_progress(),
            episodes: tracker.get_all_episode_progress(),
        },
    }
}

/// `GET /progress` - single JSON snapshot
pub async fn get_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Json<ProgressResponse> {
    Json(snapshot(&state.progress, query.feed_id.as_deref()))
}

/// `GET /progress/stream` - Server-Sent Events stream.
///
/// One `data: <json>` frame every 500 ms with the same shape as the
/// snapshot endpoint. The stream ends when the client disconnects; other
/// consumers are unaffected since every frame is an independent deep copy.
pub async fn stream_progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tracker: Arc<Tracker> = Arc::clone(&state.progress);
    let feed_id = query.feed_id;

    tracing::debug!("progress stream client connected");

    // The first tick fires immediately, so clients get an initial frame.
    let interval = tokio::time::interval(STREAM_INTERVAL);
    let stream = IntervalStream::new(interval).map(move |_| {
        let response = snapshot(&tracker, feed_id.as_deref());
        let data = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });

    Sse::new(stream)
}
