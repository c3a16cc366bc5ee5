//! In-memory download progress tracking.
//!
//! The tracker holds volatile, process-wide snapshots of feed-level and
//! episode-level download progress. Nothing here is persisted: records
//! exist only while a feed update (or a single episode) is mid-pipeline.
//! A single lock guards both maps; read operations take the read half so
//! the live progress stream scales with consumers, and every snapshot is a
//! deep copy so readers never observe torn state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use utoipa::ToSchema;

/// Pipeline stage an in-flight episode is currently in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    /// Media transfer from the provider
    #[default]
    Downloading,
    /// Transcoding / audio extraction after the transfer
    Encoding,
    /// Committing the finished file to the artifact store
    Saving,
}

/// Download progress for a single episode; exists only while the episode is
/// mid-pipeline
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EpisodeProgress {
    /// Feed the episode belongs to
    pub feed_id: String,
    /// Episode identifier
    pub episode_id: String,
    /// Episode title
    pub episode_title: String,
    /// Current pipeline stage
    pub stage: ProgressStage,
    /// Percent complete within the current stage (0-100)
    pub percent: f64,
    /// Bytes downloaded so far
    pub downloaded: i64,
    /// Total size estimate in bytes (0 if unknown)
    pub total: i64,
    /// Instantaneous speed as reported by the downloader (e.g., "1.2MiB/s")
    pub speed: String,
    /// When the download started
    pub start_time: DateTime<Utc>,
    /// When the last progress update arrived
    pub last_update: DateTime<Utc>,
}

/// Overall progress of a running feed update; exists only while the update
/// is running
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedProgress {
    /// Feed being updated
    pub feed_id: String,
    /// Episodes selected for download this run
    pub total_episodes: usize,
    /// Episodes finished so far
    pub completed_count: usize,
    /// Episodes currently downloading
    pub downloading_count: usize,
    /// Episodes still waiting in the queue
    pub queued_count: usize,
    /// Overall percent across the run (0-100), including partial progress
    /// of in-flight episodes
    pub overall_percent: f64,
    /// When the update started
    pub start_time: DateTime<Utc>,
}

#[derive(Default)]
struct TrackerState {
    feeds: HashMap<String, FeedProgress>,
    /// Keyed by `"<feed_id>/<episode_id>"`
    episodes: HashMap<String, EpisodeProgress>,
}

/// Concurrency-safe progress tracker.
///
/// Safe for many concurrent readers and one writer per episode (the update
/// pipeline).
#[derive(Default)]
pub struct Tracker {
    state: RwLock<TrackerState>,
}

fn episode_key(feed_id: &str, episode_id: &str) -> String {
    format!("{feed_id}/{episode_id}")
}

impl Tracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a feed update with `total_episodes` to download
    pub fn init_feed_progress(&self, feed_id: &str, total_episodes: usize) {
        let mut state = self.write();
        state.feeds.insert(
            feed_id.to_string(),
            FeedProgress {
                feed_id: feed_id.to_string(),
                total_episodes,
                completed_count: 0,
                downloading_count: 0,
                queued_count: 0,
                overall_percent: 0.0,
                start_time: Utc::now(),
            },
        );
    }

    /// Add `count` episodes to the feed's queued counter
    pub fn queue_episodes(&self, feed_id: &str, count: usize) {
        let mut state = self.write();
        if let Some(feed) = state.feeds.get_mut(feed_id) {
            feed.queued_count += count;
        }
        recompute_percent(&mut state, feed_id);
    }

    /// Mark an episode as starting its download
    pub fn start_episode(&self, feed_id: &str, episode_id: &str, episode_title: &str) {
        let mut state = self.write();
        let now = Utc::now();
        state.episodes.insert(
            episode_key(feed_id, episode_id),
            EpisodeProgress {
                feed_id: feed_id.to_string(),
                episode_id: episode_id.to_string(),
                episode_title: episode_title.to_string(),
                stage: ProgressStage::Downloading,
                percent: 0.0,
                downloaded: 0,
                total: 0,
                speed: String::new(),
                start_time: now,
                last_update: now,
            },
        );

        if let Some(feed) = state.feeds.get_mut(feed_id) {
            feed.downloading_count += 1;
            feed.queued_count = feed.queued_count.saturating_sub(1);
        }
        recompute_percent(&mut state, feed_id);
    }

    /// Overwrite an episode's instantaneous progress fields.
    ///
    /// Creates the record when missing, so late progress lines after a
    /// restart still show up.
    #[allow(clippy::too_many_arguments)]
    pub fn update_episode(
        &self,
        feed_id: &str,
        episode_id: &str,
        stage: ProgressStage,
        percent: f64,
        downloaded: i64,
        total: i64,
        speed: &str,
    ) {
        let mut state = self.write();
        let key = episode_key(feed_id, episode_id);
        let now = Utc::now();

        let entry = state
            .episodes
            .entry(key)
            .or_insert_with(|| EpisodeProgress {
                feed_id: feed_id.to_string(),
                episode_id: episode_id.to_string(),
                episode_title: String::new(),
                stage,
                percent: 0.0,
                downloaded: 0,
                total: 0,
                speed: String::new(),
                start_time: now,
                last_update: now,
            });

        entry.stage = stage;
        entry.percent = percent.clamp(0.0, 100.0);
        entry.downloaded = downloaded;
        entry.total = total;
        entry.speed = speed.to_string();
        entry.last_update = now;

        recompute_percent(&mut state, feed_id);
    }

    /// Remove the episode record and count it as completed
    pub fn complete_episode(&self, feed_id: &str, episode_id: &str) {
        let mut state = self.write();
        state.episodes.remove(&episode_key(feed_id, episode_id));

        if let Some(feed) = state.feeds.get_mut(feed_id) {
            feed.downloading_count = feed.downloading_count.saturating_sub(1);
            // Completed plus downloading must never exceed the run total.
            if feed.completed_count < feed.total_episodes {
                feed.completed_count += 1;
            }
        }
        recompute_percent(&mut state, feed_id);
    }

    /// Drop the feed and every episode record belonging to it.
    ///
    /// Called when the pipeline exits, successfully or not.
    pub fn clear_feed(&self, feed_id: &str) {
        let mut state = self.write();
        state.feeds.remove(feed_id);
        state.episodes.retain(|_, ep| ep.feed_id != feed_id);
    }

    /// Snapshot of one feed's progress
    pub fn get_feed_progress(&self, feed_id: &str) -> Option<FeedProgress> {
        self.read().feeds.get(feed_id).cloned()
    }

    /// Snapshot of every running feed update, keyed by feed ID
    pub fn get_all_feed_progress(&self) -> HashMap<String, FeedProgress> {
        self.read().feeds.clone()
    }

    /// Snapshot of every in-flight episode
    pub fn get_all_episode_progress(&self) -> Vec<EpisodeProgress> {
        self.read().episodes.values().cloned().collect()
    }

    /// Snapshot of the in-flight episodes belonging to one feed
    pub fn get_episodes_for_feed(&self, feed_id: &str) -> Vec<EpisodeProgress> {
        self.read()
            .episodes
            .values()
            .filter(|ep| ep.feed_id == feed_id)
            .cloned()
            .collect()
    }

    /// True while any feed update or episode download is active
    pub fn has_active_downloads(&self) -> bool {
        let state = self.read();
        !state.feeds.is_empty() || !state.episodes.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TrackerState> {
        // A poisoned lock means a writer panicked mid-update; progress data
        // is advisory, so keep serving what's there.
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Recompute a feed's overall percent after any counter change.
///
/// `(completed + Σ active.percent/100) / total × 100`, so consumers see
/// continuous progress rather than step changes.
fn recompute_percent(state: &mut TrackerState, feed_id: &str) {
    let partial: f64 = state
        .episodes
        .values()
        .filter(|ep| ep.feed_id == feed_id)
        .map(|ep| ep.percent / 100.0)
        .sum();

    if let Some(feed) = state.feeds.get_mut(feed_id) {
        if feed.total_episodes == 0 {
            feed.overall_percent = 0.0;
        } else {
            let completed = feed.completed_count as f64 + partial;
            feed.overall_percent =
                (completed / feed.total_episodes as f64 * 100.0).clamp(0.0, 100.0);
        }
    }
}
