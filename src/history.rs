//! Job history recording.
//!
//! The recorder is the single entry point for history writes: the update
//! pipeline and the episode-scoped operations log through it, never through
//! the storage gateway directly. When history is disabled in the
//! configuration every method is a no-op returning `Ok` - that is the only
//! effect of the flag.

use crate::db::Storage;
use crate::error::Result;
use crate::model::{
    EpisodeDetail, HistoryEntry, JobStatistics, JobStatus, JobType, TriggerType,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Records job runs and their outcomes
pub struct HistoryRecorder {
    storage: Arc<Storage>,
    enabled: bool,
}

impl HistoryRecorder {
    /// Create a recorder; `enabled = false` turns every method into a no-op
    pub fn new(storage: Arc<Storage>, enabled: bool) -> Self {
        Self { storage, enabled }
    }

    /// Whether history recording is enabled
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Generate an entry ID whose lexicographic order is chronological
    fn new_entry_id() -> String {
        format!("{}-{}", Utc::now().timestamp(), Uuid::new_v4())
    }

    /// Insert a running entry for a feed update; returns its ID.
    ///
    /// Returns an empty ID when history is disabled, which later calls
    /// treat as "nothing to update".
    pub async fn log_feed_update_start(
        &self,
        feed_id: &str,
        feed_title: &str,
        trigger: TriggerType,
    ) -> Result<String> {
        if !self.enabled {
            return Ok(String::new());
        }

        let entry_id = Self::new_entry_id();
        let entry = HistoryEntry {
            id: entry_id.clone(),
            job_type: JobType::FeedUpdate,
            feed_id: feed_id.to_string(),
            feed_title: feed_title.to_string(),
            episode_id: String::new(),
            episode_title: String::new(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            status: JobStatus::Running,
            trigger_type: trigger,
            statistics: JobStatistics::default(),
            error: String::new(),
        };

        self.storage.add_history(&entry).await?;
        tracing::debug!(entry_id, feed_id, "created history entry for feed update");
        Ok(entry_id)
    }

    /// Close out a feed update entry with its final status and statistics
    pub async fn log_feed_update_end(
        &self,
        entry_id: &str,
        status: JobStatus,
        stats: JobStatistics,
        error: &str,
    ) -> Result<()> {
        if !self.enabled || entry_id.is_empty() {
            return Ok(());
        }

        let error = error.to_string();
        self.storage
            .update_history(entry_id, move |entry| {
                let now = Utc::now();
                entry.end_time = Some(now);
                entry.duration_ms = (now - entry.start_time).num_milliseconds();
                entry.status = status;
                entry.statistics = stats;
                entry.error = error;
                Ok(())
            })
            .await?;

        tracing::debug!(entry_id, ?status, "closed history entry");
        Ok(())
    }

    /// Close out a feed update entry, attaching per-episode details for the
    /// episodes the job processed.
    ///
    /// Episodes missing from storage are skipped with a warning rather than
    /// failing the close-out.
    pub async fn log_feed_update_end_with_episodes(
        &self,
        entry_id: &str,
        feed_id: &str,
        episode_ids: &[String],
        status: JobStatus,
        mut stats: JobStatistics,
        error: &str,
    ) -> Result<()> {
        if !self.enabled || entry_id.is_empty() {
            return Ok(());
        }

        let mut details = Vec::with_capacity(episode_ids.len());
        for episode_id in episode_ids {
            match self.storage.get_episode(feed_id, episode_id).await {
                Ok(episode) => details.push(EpisodeDetail {
                    id: episode.id,
                    title: episode.title,
                    status: episode.status.as_str().to_string(),
                    error: episode.error,
                    size: episode.size,
                    duration: episode.duration,
                }),
                Err(e) => {
                    tracing::warn!(
                        feed_id,
                        episode_id,
                        error = %e,
                        "failed to load episode for history details"
                    );
                }
            }
        }
        stats.episode_details = details;

        self.log_feed_update_end(entry_id, status, stats, error).await
    }

    /// Log a manual episode retry as a single terminal entry
    pub async fn log_episode_retry(
        &self,
        feed_id: &str,
        feed_title: &str,
        episode_id: &str,
        episode_title: &str,
        success: bool,
        error: &str,
    ) -> Result<()> {
        self.log_episode_job(
            JobType::EpisodeRetry,
            feed_id,
            feed_title,
            episode_id,
            episode_title,
            success,
            error,
        )
        .await
    }

    /// Log a manual episode deletion as a single terminal entry
    pub async fn log_episode_delete(
        &self,
        feed_id: &str,
        feed_title: &str,
        episode_id: &str,
        episode_title: &str,
        success: bool,
        error: &str,
    ) -> Result<()> {
        self.log_episode_job(
            JobType::EpisodeDelete,
            feed_id,
            feed_title,
            episode_id,
            episode_title,
            success,
            error,
        )
        .await
    }

    /// Log a manual episode block as a single terminal entry
    pub async fn log_episode_block(
        &self,
        feed_id: &str,
        feed_title: &str,
        episode_id: &str,
        episode_title: &str,
        success: bool,
        error: &str,
    ) -> Result<()> {
        self.log_episode_job(
            JobType::EpisodeBlock,
            feed_id,
            feed_title,
            episode_id,
            episode_title,
            success,
            error,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_episode_job(
        &self,
        job_type: JobType,
        feed_id: &str,
        feed_title: &str,
        episode_id: &str,
        episode_title: &str,
        success: bool,
        error: &str,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let now = Utc::now();
        let entry = HistoryEntry {
            id: Self::new_entry_id(),
            job_type,
            feed_id: feed_id.to_string(),
            feed_title: feed_title.to_string(),
            episode_id: episode_id.to_string(),
            episode_title: episode_title.to_string(),
            start_time: now,
            end_time: Some(now),
            duration_ms: 0,
            status: if success {
                JobStatus::Success
            } else {
                JobStatus::Failed
            },
            trigger_type: TriggerType::Manual,
            statistics: JobStatistics::default(),
            error: error.to_string(),
        };

        self.storage.add_history(&entry).await?;
        tracing::debug!(?job_type, feed_id, episode_id, "logged episode job");
        Ok(())
    }

    /// Remove entries per the retention policy
    pub async fn cleanup_old_entries(
        &self,
        retention_days: u32,
        max_entries: u32,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        tracing::info!(
            retention_days,
            max_entries,
            "cleaning up old history entries"
        );
        let deleted = self
            .storage
            .cleanup_history(retention_days, max_entries)
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "history cleanup removed entries");
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Episode, EpisodeStatus, Feed, HistoryFilters};

    async fn recorder(enabled: bool) -> (HistoryRecorder, Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        (
            HistoryRecorder::new(storage.clone(), enabled),
            storage,
            dir,
        )
    }

    #[tokio::test]
    async fn feed_update_start_creates_running_entry() {
        let (recorder, storage, _dir) = recorder(true).await;

        let id = recorder
            .log_feed_update_start("bbc", "BBC News", TriggerType::Scheduled)
            .await
            .unwrap();

        let entry = storage.get_history(&id).await.unwrap();
        assert_eq!(entry.status, JobStatus::Running);
        assert_eq!(entry.job_type, JobType::FeedUpdate);
        assert_eq!(entry.feed_title, "BBC News");
        assert!(entry.end_time.is_none());
    }

    #[tokio::test]
    async fn entry_ids_sort_chronologically() {
        let id = HistoryRecorder::new_entry_id();
        let (timestamp, uuid) = id.split_once('-').unwrap();
        assert!(timestamp.parse::<i64>().is_ok());
        assert!(!uuid.is_empty());
    }

    #[tokio::test]
    async fn feed_update_end_sets_terminal_fields() {
        let (recorder, storage, _dir) = recorder(true).await;

        let id = recorder
            .log_feed_update_start("bbc", "BBC", TriggerType::Scheduled)
            .await
            .unwrap();

        let stats = JobStatistics {
            episodes_queued: 3,
            episodes_downloaded: 2,
            episodes_failed: 1,
            ..Default::default()
        };
        recorder
            .log_feed_update_end(&id, JobStatus::Partial, stats, "one failed")
            .await
            .unwrap();

        let entry = storage.get_history(&id).await.unwrap();
        assert_eq!(entry.status, JobStatus::Partial);
        assert_eq!(entry.statistics.episodes_downloaded, 2);
        assert_eq!(entry.error, "one failed");
        let end = entry.end_time.unwrap();
        assert!(end >= entry.start_time);
        assert_eq!(entry.duration_ms, (end - entry.start_time).num_milliseconds());
    }

    #[tokio::test]
    async fn end_with_episodes_attaches_details_and_skips_missing() {
        let (recorder, storage, _dir) = recorder(true).await;

        storage
            .add_feed(
                "bbc",
                &Feed {
                    id: "bbc".into(),
                    episodes: vec![Episode {
                        id: "a".into(),
                        title: "Episode A".into(),
                        status: EpisodeStatus::Downloaded,
                        size: 1024,
                        duration: 60,
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let id = recorder
            .log_feed_update_start("bbc", "BBC", TriggerType::Scheduled)
            .await
            .unwrap();

        recorder
            .log_feed_update_end_with_episodes(
                &id,
                "bbc",
                &["a".to_string(), "missing".to_string()],
                JobStatus::Success,
                JobStatistics::default(),
                "",
            )
            .await
            .unwrap();

        let entry = storage.get_history(&id).await.unwrap();
        let details = &entry.statistics.episode_details;
        assert_eq!(details.len(), 1, "missing episode skipped, not fatal");
        assert_eq!(details[0].id, "a");
        assert_eq!(details[0].status, "downloaded");
        assert_eq!(details[0].size, 1024);
    }

    #[tokio::test]
    async fn episode_jobs_are_single_shot_terminal_entries() {
        let (recorder, storage, _dir) = recorder(true).await;

        recorder
            .log_episode_block("bbc", "BBC", "a", "Episode A", true, "")
            .await
            .unwrap();
        recorder
            .log_episode_delete("bbc", "BBC", "b", "Episode B", false, "boom")
            .await
            .unwrap();

        let (entries, total) = storage
            .list_history(&HistoryFilters::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);

        for entry in &entries {
            assert_eq!(entry.trigger_type, TriggerType::Manual);
            assert_eq!(entry.duration_ms, 0);
            assert_eq!(entry.end_time, Some(entry.start_time));
        }

        let failed = entries
            .iter()
            .find(|e| e.job_type == JobType::EpisodeDelete)
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error, "boom");
    }

    #[tokio::test]
    async fn disabled_recorder_is_a_noop() {
        let (recorder, storage, _dir) = recorder(false).await;

        let id = recorder
            .log_feed_update_start("bbc", "BBC", TriggerType::Scheduled)
            .await
            .unwrap();
        assert!(id.is_empty(), "disabled recorder returns an empty ID");

        recorder
            .log_feed_update_end(&id, JobStatus::Success, JobStatistics::default(), "")
            .await
            .unwrap();
        recorder
            .log_episode_retry("bbc", "BBC", "a", "A", true, "")
            .await
            .unwrap();
        recorder.cleanup_old_entries(30, 100).await.unwrap();

        let (count, _) = storage.history_stats().await.unwrap();
        assert_eq!(count, 0, "nothing may be written while disabled");
    }

    #[tokio::test]
    async fn cleanup_delegates_to_storage() {
        let (recorder, storage, _dir) = recorder(true).await;

        for _ in 0..3 {
            recorder
                .log_episode_retry("bbc", "BBC", "a", "A", true, "")
                .await
                .unwrap();
        }

        recorder.cleanup_old_entries(0, 1).await.unwrap();

        let (count, _) = storage.history_stats().await.unwrap();
        assert_eq!(count, 1);
    }
}
