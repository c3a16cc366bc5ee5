//! The per-feed update pipeline.
//!
//! [`Updater::update`] runs the stages in order: fetch & reconcile, filter
//! & select, download, cleanup, publish, history close-out. Feed updates
//! are serialized by the scheduler's single worker, so one update runs at a
//! time across the whole process.
//!
//! The episode-scoped operations ([`Updater::delete_episode`],
//! [`Updater::block_episode`], [`Updater::retry_episode`]) are isolated
//! entry points; each writes exactly one terminal history entry.

use crate::builder::ListingSource;
use crate::config::FeedConfig;
use crate::db::Storage;
use crate::error::{CleanupErrors, Error, Result};
use crate::feed::{build_feed_xml, build_opml, episode_path, match_filters};
use crate::fs::ArtifactStore;
use crate::history::HistoryRecorder;
use crate::model::{Episode, EpisodeStatus, Feed, JobStatistics, JobStatus, TriggerType};
use crate::progress::Tracker;
use crate::ytdl::{Downloader, Progress, ProgressSink};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Runs feed updates and episode-scoped operations
pub struct Updater {
    hostname: String,
    downloader: Arc<dyn Downloader>,
    listings: Arc<dyn ListingSource>,
    db: Arc<Storage>,
    fs: Arc<dyn ArtifactStore>,
    progress: Arc<Tracker>,
    history: Arc<HistoryRecorder>,
    feeds: RwLock<BTreeMap<String, FeedConfig>>,
    shutdown: CancellationToken,
}

impl Updater {
    /// Wire up the pipeline with its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feeds: BTreeMap<String, FeedConfig>,
        hostname: String,
        downloader: Arc<dyn Downloader>,
        listings: Arc<dyn ListingSource>,
        db: Arc<Storage>,
        fs: Arc<dyn ArtifactStore>,
        history: Arc<HistoryRecorder>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hostname,
            downloader,
            listings,
            db,
            fs,
            progress: Arc::new(Tracker::new()),
            history,
            feeds: RwLock::new(feeds),
            shutdown,
        }
    }

    /// The tracker holding live download progress
    pub fn progress_tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.progress)
    }

    /// The history recorder jobs are logged through
    pub fn history(&self) -> Arc<HistoryRecorder> {
        Arc::clone(&self.history)
    }

    /// Configuration of one feed, if it exists
    pub fn feed_config(&self, feed_id: &str) -> Option<FeedConfig> {
        self.read_feeds().get(feed_id).cloned()
    }

    /// Configurations of every hosted feed
    pub fn all_feed_configs(&self) -> Vec<FeedConfig> {
        self.read_feeds().values().cloned().collect()
    }

    /// Insert or replace a feed configuration (config-update path)
    pub fn upsert_feed_config(&self, config: FeedConfig) {
        self.write_feeds().insert(config.id.clone(), config);
    }

    /// Forget a feed configuration
    pub fn remove_feed_config(&self, feed_id: &str) {
        self.write_feeds().remove(feed_id);
    }

    fn read_feeds(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, FeedConfig>> {
        self.feeds.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_feeds(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, FeedConfig>> {
        self.feeds.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the full update pipeline for one feed
    pub async fn update(&self, config: &FeedConfig, trigger: TriggerType) -> Result<()> {
        tracing::info!(
            feed_id = %config.id,
            format = ?config.format,
            quality = ?config.quality,
            url = %config.url,
            "updating feed"
        );
        let started = std::time::Instant::now();

        let feed_title = self.feed_title(&config.id).await;
        let history_id = self
            .history
            .log_feed_update_start(&config.id, &feed_title, trigger)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to create history entry");
                String::new()
            });

        let mut stats = JobStatistics::default();

        if let Err(e) = self.update_feed(config).await {
            let message = format!("update failed: {e}");
            self.close_history(&history_id, JobStatus::Failed, stats, &message)
                .await;
            return Err(e);
        }

        let (download_list, ignored) = match self.fetch_episodes(config).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("fetch episodes failed: {e}");
                self.close_history(&history_id, JobStatus::Failed, stats, &message)
                    .await;
                return Err(e);
            }
        };

        stats.episodes_queued = download_list.len();
        stats.episodes_ignored = ignored;
        let episode_ids: Vec<String> = download_list.iter().map(|ep| ep.id.clone()).collect();

        let (downloaded, failed, bytes) = self
            .download_episodes_with_stats(config, &download_list)
            .await;
        stats.episodes_downloaded = downloaded;
        stats.episodes_failed = failed;
        stats.bytes_downloaded = bytes;

        if let Err(e) = self.cleanup(config).await {
            tracing::error!(feed_id = %config.id, error = %e, "cleanup failed");
        }

        if let Err(e) = self.build_xml(config).await {
            let message = format!("xml build failed: {e}");
            self.close_history(&history_id, JobStatus::Failed, stats, &message)
                .await;
            return Err(e);
        }

        if let Err(e) = self.build_opml().await {
            let message = format!("opml build failed: {e}");
            self.close_history(&history_id, JobStatus::Failed, stats, &message)
                .await;
            return Err(e);
        }

        tracing::info!(
            feed_id = %config.id,
            elapsed = ?started.elapsed(),
            downloaded,
            failed,
            "successfully updated feed"
        );

        let status = final_status(&stats);
        if let Err(e) = self
            .history
            .log_feed_update_end_with_episodes(&history_id, &config.id, &episode_ids, status, stats, "")
            .await
        {
            tracing::warn!(error = %e, "failed to close history entry");
        }

        Ok(())
    }

    async fn close_history(
        &self,
        history_id: &str,
        status: JobStatus,
        stats: JobStatistics,
        error: &str,
    ) {
        if let Err(e) = self
            .history
            .log_feed_update_end(history_id, status, stats, error)
            .await
        {
            tracing::warn!(error = %e, "failed to close history entry");
        }
    }

    /// Stage 1: pull the remote listing and reconcile with stored episodes
    async fn update_feed(&self, config: &FeedConfig) -> Result<()> {
        tracing::debug!(feed_id = %config.id, "building feed");
        let mut fetched = self.listings.build(config).await?;
        tracing::debug!(
            feed_id = %config.id,
            count = fetched.episodes.len(),
            "received episodes from listing"
        );

        // Blocked episodes are sticky; new/error episodes are candidates for
        // removal if they vanished from the listing. Downloaded and cleaned
        // records are always preserved.
        let mut blocked = HashSet::new();
        let mut pending = HashSet::new();
        self.db
            .walk_episodes(&config.id, |episode| {
                match episode.status {
                    EpisodeStatus::Blocked => {
                        blocked.insert(episode.id);
                    }
                    EpisodeStatus::New | EpisodeStatus::Error => {
                        pending.insert(episode.id);
                    }
                    _ => {}
                }
                Ok(())
            })
            .await?;

        fetched.episodes.retain(|episode| {
            let keep = !blocked.contains(&episode.id);
            if !keep {
                tracing::debug!(episode_id = %episode.id, "skipping blocked episode");
            }
            keep
        });

        self.db.add_feed(&config.id, &fetched).await?;

        for episode in &fetched.episodes {
            pending.remove(&episode.id);
        }

        // Garbage-collect stale new/error records the upstream channel has
        // removed. An empty listing is treated as a provider hiccup and
        // collects nothing.
        if !fetched.episodes.is_empty() {
            for episode_id in pending {
                tracing::info!(feed_id = %config.id, episode_id, "removing stale episode");
                self.db.delete_episode(&config.id, &episode_id).await?;
            }
        }

        tracing::debug!(feed_id = %config.id, "saved updates to storage");
        Ok(())
    }

    /// Stage 2: walk stored episodes and select the downloadable set.
    ///
    /// Returns the download list plus the number of episodes newly marked
    /// ignored by the filters.
    async fn fetch_episodes(&self, config: &FeedConfig) -> Result<(Vec<Episode>, usize)> {
        tracing::debug!(
            feed_id = %config.id,
            page_size = config.page_size,
            "selecting episodes for download"
        );

        let mut budget = config.page_size as i64;
        let mut download_list = Vec::new();
        let mut to_ignore = Vec::new();

        self.db
            .walk_episodes(&config.id, |episode| {
                if episode.status == EpisodeStatus::Blocked {
                    return Ok(());
                }
                if episode.status != EpisodeStatus::New && episode.status != EpisodeStatus::Error
                {
                    return Ok(());
                }

                if !match_filters(&episode, &config.filters) {
                    // Persist the rejection so the episode is not
                    // re-evaluated every run.
                    if episode.status == EpisodeStatus::New {
                        to_ignore.push(episode.id);
                    }
                    return Ok(());
                }

                budget -= 1;
                if budget < 0 {
                    return Ok(());
                }

                tracing::debug!(episode_id = %episode.id, title = %episode.title, "queuing episode");
                download_list.push(episode);
                Ok(())
            })
            .await?;

        let mut ignored = 0;
        for episode_id in to_ignore {
            match self
                .set_episode_status(&config.id, &episode_id, EpisodeStatus::Ignored)
                .await
            {
                Ok(()) => ignored += 1,
                Err(e) => {
                    tracing::warn!(episode_id, error = %e, "failed to mark episode as ignored")
                }
            }
        }

        Ok((download_list, ignored))
    }

    /// Stage 3 wrapper: measure downloaded/failed/bytes by diffing episode
    /// state before and after the downloads
    async fn download_episodes_with_stats(
        &self,
        config: &FeedConfig,
        download_list: &[Episode],
    ) -> (usize, usize, i64) {
        let before = self.collect_episode_stats(&config.id, download_list).await;

        if let Err(e) = self.download_episodes(config, download_list).await {
            tracing::error!(feed_id = %config.id, error = %e, "download stage failed");
        }

        let after = self.collect_episode_stats(&config.id, download_list).await;

        (
            after.downloaded.saturating_sub(before.downloaded),
            after.failed.saturating_sub(before.failed),
            after.bytes - before.bytes,
        )
    }

    async fn collect_episode_stats(
        &self,
        feed_id: &str,
        episodes: &[Episode],
    ) -> EpisodeStats {
        let mut stats = EpisodeStats::default();
        for episode in episodes {
            let Ok(current) = self.db.get_episode(feed_id, &episode.id).await else {
                continue;
            };
            match current.status {
                EpisodeStatus::Downloaded => {
                    stats.downloaded += 1;
                    stats.bytes += current.size;
                }
                EpisodeStatus::Error => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Stage 3: download every selected episode in order
    async fn download_episodes(
        &self,
        config: &FeedConfig,
        download_list: &[Episode],
    ) -> Result<()> {
        if download_list.is_empty() {
            tracing::info!(feed_id = %config.id, "no episodes to download");
            return Ok(());
        }
        tracing::info!(feed_id = %config.id, count = download_list.len(), "download count");

        self.progress
            .init_feed_progress(&config.id, download_list.len());
        let result = self.download_episodes_inner(config, download_list).await;
        self.progress.clear_feed(&config.id);
        result
    }

    async fn download_episodes_inner(
        &self,
        config: &FeedConfig,
        download_list: &[Episode],
    ) -> Result<()> {
        let feed_id = &config.id;

        for episode in download_list {
            if let Err(e) = self
                .set_episode_status(feed_id, &episode.id, EpisodeStatus::Queued)
                .await
            {
                tracing::warn!(episode_id = %episode.id, error = %e, "failed to mark episode queued");
            }
        }
        self.progress.queue_episodes(feed_id, download_list.len());

        let mut downloaded = 0;
        for (index, episode) in download_list.iter().enumerate() {
            // Shutdown is observed between episodes, never mid-download.
            if self.shutdown.is_cancelled() {
                tracing::info!(feed_id, "cancellation requested, stopping downloads");
                break;
            }

            let path = episode_path(config, episode);
            tracing::debug!(index, episode_id = %episode.id, "processing episode");

            // Idempotent re-entry: a file already in the store just needs
            // its record brought up to date.
            match self.fs.size(&path).await {
                Ok(size) => {
                    tracing::info!(episode_id = %episode.id, size, "episode already exists in storage");
                    self.mark_downloaded(feed_id, &episode.id, size as i64).await?;
                    continue;
                }
                Err(Error::NotExist(_)) => {}
                Err(e) => {
                    tracing::error!(episode_id = %episode.id, error = %e, "failed to stat artifact");
                    return Err(e);
                }
            }

            if let Err(e) = self
                .set_episode_status(feed_id, &episode.id, EpisodeStatus::Downloading)
                .await
            {
                tracing::warn!(episode_id = %episode.id, error = %e, "failed to mark episode downloading");
            }
            self.progress
                .start_episode(feed_id, &episode.id, &episode.title);

            let sink = self.progress_sink(feed_id, &episode.id);

            tracing::info!(episode_id = %episode.id, url = %episode.video_url, "downloading episode");
            let media = match self.downloader.download(config, episode, sink).await {
                Ok(media) => media,
                Err(Error::TooManyRequests) => {
                    // The provider is rate-limiting us. Stop asking for more
                    // this run; the feed document still gets rebuilt and the
                    // remaining episodes stay queued for the next run.
                    tracing::warn!(feed_id, "server responded with 'Too Many Requests'");
                    if let Err(e) = self
                        .set_episode_status(feed_id, &episode.id, EpisodeStatus::Queued)
                        .await
                    {
                        tracing::warn!(episode_id = %episode.id, error = %e, "failed to re-queue episode");
                    }
                    break;
                }
                Err(e) => {
                    tracing::error!(episode_id = %episode.id, error = %e, "failed to download episode");
                    self.mark_error(feed_id, &episode.id, &e.to_string()).await?;
                    continue;
                }
            };

            tracing::debug!(episode_id = %episode.id, "copying file");
            let size = self.fs.create(&path, Box::new(media)).await?;

            self.run_hooks(config, &path, episode).await;

            tracing::info!(episode_id = %episode.id, size, "successfully downloaded episode");
            self.mark_downloaded(feed_id, &episode.id, size as i64).await?;
            self.progress.complete_episode(feed_id, &episode.id);
            downloaded += 1;
        }

        tracing::info!(feed_id, downloaded, "downloaded episode(s)");
        Ok(())
    }

    /// Per-episode progress sink forwarding into the tracker
    fn progress_sink(&self, feed_id: &str, episode_id: &str) -> ProgressSink {
        let tracker = Arc::clone(&self.progress);
        let feed_id = feed_id.to_string();
        let episode_id = episode_id.to_string();
        Arc::new(move |update: Progress| {
            tracker.update_episode(
                &feed_id,
                &episode_id,
                update.stage,
                update.percent,
                update.downloaded,
                update.total,
                &update.speed,
            );
        })
    }

    /// Run every configured post-download hook; failures are logged but do
    /// not fail the episode
    async fn run_hooks(&self, config: &FeedConfig, episode_file: &str, episode: &Episode) {
        for (index, hook) in config.post_episode_download.iter().enumerate() {
            let env = [
                ("EPISODE_FILE", episode_file),
                ("FEED_NAME", config.id.as_str()),
                ("EPISODE_TITLE", episode.title.as_str()),
            ];

            match invoke_hook(hook, &env).await {
                Ok(()) => {
                    tracing::info!(hook = index + 1, "post episode download hook executed");
                }
                Err(e) => {
                    tracing::error!(hook = index + 1, error = %e, "post episode download hook failed");
                }
            }
        }
    }

    /// Stage 4: apply the keep-last cleanup policy
    async fn cleanup(&self, config: &FeedConfig) -> Result<()> {
        let Some(clean) = config.clean else {
            tracing::debug!(feed_id = %config.id, "no cleanup policy configured");
            return Ok(());
        };

        let keep = clean.keep_last;
        if keep < 1 {
            tracing::debug!(feed_id = %config.id, "nothing to clean");
            return Ok(());
        }

        tracing::info!(feed_id = %config.id, keep, "running cleaner");

        let mut downloaded = Vec::new();
        self.db
            .walk_episodes(&config.id, |episode| {
                if episode.status == EpisodeStatus::Downloaded {
                    downloaded.push(episode);
                }
                Ok(())
            })
            .await?;

        if keep >= downloaded.len() {
            return Ok(());
        }

        downloaded.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

        let mut errors = CleanupErrors::default();
        for episode in &downloaded[keep..] {
            tracing::info!(episode_id = %episode.id, title = %episode.title, "cleaning episode");

            let path = episode_path(config, episode);
            match self.fs.delete(&path).await {
                Ok(()) => {}
                Err(Error::NotExist(_)) => {
                    tracing::info!(episode_id = %episode.id, "artifact already gone");
                }
                Err(e) => {
                    tracing::error!(episode_id = %episode.id, error = %e, "failed to delete artifact");
                    errors.push(format!("failed to delete episode {}: {e}", episode.id));
                    continue;
                }
            }

            if let Err(e) = self
                .db
                .update_episode(&config.id, &episode.id, |ep| {
                    if !ep.status.can_transition(EpisodeStatus::Cleaned) {
                        return Err(Error::InvalidTransition {
                            from: ep.status.to_string(),
                            to: EpisodeStatus::Cleaned.to_string(),
                        });
                    }
                    ep.status = EpisodeStatus::Cleaned;
                    ep.title = String::new();
                    ep.description = String::new();
                    Ok(())
                })
                .await
            {
                errors.push(format!(
                    "failed to set state for cleaned episode {}: {e}",
                    episode.id
                ));
            }
        }

        errors.into_result()
    }

    /// Stage 5a: render and publish the feed document
    async fn build_xml(&self, config: &FeedConfig) -> Result<()> {
        let feed = self.db.get_feed(&config.id).await?;

        tracing::debug!(feed_id = %config.id, "building podcast feed document");
        let xml = build_feed_xml(&feed, config, &self.hostname);

        let name = format!("{}.xml", config.id);
        self.fs
            .create(&name, Box::new(Cursor::new(xml.into_bytes())))
            .await?;
        Ok(())
    }

    /// Stage 5b: render and publish the combined OPML document
    async fn build_opml(&self) -> Result<()> {
        tracing::debug!("building podcast OPML");

        let configs = self.all_feed_configs();
        let mut entries = Vec::with_capacity(configs.len());
        for config in &configs {
            let title = match self.db.get_feed(&config.id).await {
                Ok(feed) => feed.title,
                Err(_) => String::new(),
            };
            entries.push((config, title));
        }

        let opml = build_opml(&entries, &self.hostname);
        self.fs
            .create("podsync.opml", Box::new(Cursor::new(opml.into_bytes())))
            .await?;
        Ok(())
    }

    /// Delete an episode's record and artifact
    pub async fn delete_episode(&self, feed_id: &str, episode_id: &str) -> Result<()> {
        let config = self.require_feed(feed_id)?;
        let feed_title = self.feed_title(feed_id).await;

        let episode = match self.db.get_episode(feed_id, episode_id).await {
            Ok(episode) => episode,
            Err(e) => {
                let _ = self
                    .history
                    .log_episode_delete(feed_id, &feed_title, episode_id, "", false, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        self.delete_artifact(&config, &episode).await;

        if let Err(e) = self.db.delete_episode(feed_id, episode_id).await {
            let _ = self
                .history
                .log_episode_delete(
                    feed_id,
                    &feed_title,
                    episode_id,
                    &episode.title,
                    false,
                    &e.to_string(),
                )
                .await;
            return Err(e);
        }

        tracing::info!(feed_id, episode_id, "deleted episode");
        let _ = self
            .history
            .log_episode_delete(feed_id, &feed_title, episode_id, &episode.title, true, "")
            .await;
        Ok(())
    }

    /// Block an episode so no future listing re-downloads it.
    ///
    /// Unknown IDs get a stub record with status=blocked, so the episode is
    /// filtered out before its first download.
    pub async fn block_episode(&self, feed_id: &str, episode_id: &str) -> Result<()> {
        let config = self.require_feed(feed_id)?;
        let feed_title = self.feed_title(feed_id).await;

        let episode = match self.db.get_episode(feed_id, episode_id).await {
            Ok(episode) => {
                if let Err(e) = self
                    .set_episode_status(feed_id, episode_id, EpisodeStatus::Blocked)
                    .await
                {
                    let _ = self
                        .history
                        .log_episode_block(
                            feed_id,
                            &feed_title,
                            episode_id,
                            &episode.title,
                            false,
                            &e.to_string(),
                        )
                        .await;
                    return Err(e);
                }
                episode
            }
            Err(Error::NotFound(_)) => {
                tracing::info!(feed_id, episode_id, "episode unknown, creating blocked stub");
                let stub = Episode {
                    id: episode_id.to_string(),
                    status: EpisodeStatus::Blocked,
                    ..Default::default()
                };

                // Keep the stored feed metadata intact while appending the
                // stub record.
                let mut feed = match self.db.get_feed(feed_id).await {
                    Ok(feed) => feed,
                    Err(Error::NotFound(_)) => Feed {
                        id: feed_id.to_string(),
                        ..Default::default()
                    },
                    Err(e) => return Err(e),
                };
                feed.episodes = vec![stub.clone()];

                if let Err(e) = self.db.add_feed(feed_id, &feed).await {
                    let _ = self
                        .history
                        .log_episode_block(feed_id, &feed_title, episode_id, "", false, &e.to_string())
                        .await;
                    return Err(e);
                }
                stub
            }
            Err(e) => {
                let _ = self
                    .history
                    .log_episode_block(feed_id, &feed_title, episode_id, "", false, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        self.delete_artifact(&config, &episode).await;

        tracing::info!(feed_id, episode_id, "blocked episode");
        let _ = self
            .history
            .log_episode_block(feed_id, &feed_title, episode_id, &episode.title, true, "")
            .await;
        Ok(())
    }

    /// Re-download a single episode, then rebuild the feed document.
    ///
    /// The status is reset to new first; if the artifact already exists the
    /// record is marked downloaded without re-invoking the downloader.
    pub async fn retry_episode(&self, feed_id: &str, episode_id: &str) -> Result<()> {
        let config = self.require_feed(feed_id)?;
        let feed_title = self.feed_title(feed_id).await;

        let episode = match self.db.get_episode(feed_id, episode_id).await {
            Ok(episode) => episode,
            Err(e) => {
                let _ = self
                    .history
                    .log_episode_retry(feed_id, &feed_title, episode_id, "", false, &e.to_string())
                    .await;
                return Err(e);
            }
        };
        let episode_title = episode.title.clone();

        // An explicit retry resets any terminal status, including cleaned.
        self.db
            .update_episode(feed_id, episode_id, |ep| {
                ep.status = EpisodeStatus::New;
                ep.error = String::new();
                Ok(())
            })
            .await?;

        let path = episode_path(&config, &episode);

        match self.fs.size(&path).await {
            Ok(size) => {
                tracing::info!(feed_id, episode_id, size, "episode already exists in storage");
                self.mark_downloaded(feed_id, episode_id, size as i64).await?;

                if let Err(e) = self.build_xml(&config).await {
                    tracing::warn!(error = %e, "failed to rebuild feed document after retry");
                }
                let _ = self
                    .history
                    .log_episode_retry(feed_id, &feed_title, episode_id, &episode_title, true, "")
                    .await;
                return Ok(());
            }
            Err(Error::NotExist(_)) => {}
            Err(e) => {
                tracing::error!(feed_id, episode_id, error = %e, "failed to stat artifact");
                return Err(e);
            }
        }

        self.progress.start_episode(feed_id, episode_id, &episode_title);
        let sink = self.progress_sink(feed_id, episode_id);

        tracing::info!(feed_id, episode_id, url = %episode.video_url, "downloading episode");
        let media = match self.downloader.download(&config, &episode, sink).await {
            Ok(media) => media,
            Err(e) => {
                self.progress.complete_episode(feed_id, episode_id);
                self.mark_error(feed_id, episode_id, &e.to_string()).await?;
                let _ = self
                    .history
                    .log_episode_retry(
                        feed_id,
                        &feed_title,
                        episode_id,
                        &episode_title,
                        false,
                        &e.to_string(),
                    )
                    .await;
                return Err(e);
            }
        };

        let size = match self.fs.create(&path, Box::new(media)).await {
            Ok(size) => size,
            Err(e) => {
                self.progress.complete_episode(feed_id, episode_id);
                let message = format!("failed to copy file: {e}");
                self.mark_error(feed_id, episode_id, &message).await?;
                let _ = self
                    .history
                    .log_episode_retry(
                        feed_id,
                        &feed_title,
                        episode_id,
                        &episode_title,
                        false,
                        &message,
                    )
                    .await;
                return Err(e);
            }
        };

        self.run_hooks(&config, &path, &episode).await;

        self.mark_downloaded(feed_id, episode_id, size as i64).await?;
        self.progress.complete_episode(feed_id, episode_id);

        if let Err(e) = self.build_xml(&config).await {
            tracing::warn!(error = %e, "failed to rebuild feed document after retry");
        }

        tracing::info!(feed_id, episode_id, size, "successfully retried episode");
        let _ = self
            .history
            .log_episode_retry(feed_id, &feed_title, episode_id, &episode_title, true, "")
            .await;
        Ok(())
    }

    /// Delete a feed: its episodes, their artifacts, and the published
    /// document. History entries are retained.
    pub async fn delete_feed(&self, feed_id: &str) -> Result<()> {
        let config = self.require_feed(feed_id)?;

        let mut episodes = Vec::new();
        self.db
            .walk_episodes(feed_id, |episode| {
                episodes.push(episode);
                Ok(())
            })
            .await?;

        for episode in &episodes {
            self.delete_artifact(&config, episode).await;
        }

        match self.fs.delete(&format!("{feed_id}.xml")).await {
            Ok(()) | Err(Error::NotExist(_)) => {}
            Err(e) => tracing::warn!(feed_id, error = %e, "failed to delete feed document"),
        }

        self.db.delete_feed(feed_id).await?;
        self.remove_feed_config(feed_id);

        tracing::info!(feed_id, "deleted feed");
        Ok(())
    }

    /// Remove an episode's artifact, treating a missing file as success
    async fn delete_artifact(&self, config: &FeedConfig, episode: &Episode) {
        let path = episode_path(config, episode);
        match self.fs.delete(&path).await {
            Ok(()) => tracing::info!(path, "deleted media file"),
            Err(Error::NotExist(_)) => {
                tracing::debug!(path, "media file does not exist, skipping deletion");
            }
            Err(e) => tracing::warn!(path, error = %e, "failed to delete media file"),
        }
    }

    fn require_feed(&self, feed_id: &str) -> Result<FeedConfig> {
        self.feed_config(feed_id)
            .ok_or_else(|| Error::NotFound(format!("feed {feed_id:?}")))
    }

    /// Title of a feed for history snapshots, falling back to the feed ID
    async fn feed_title(&self, feed_id: &str) -> String {
        match self.db.get_feed(feed_id).await {
            Ok(feed) if !feed.title.is_empty() => feed.title,
            _ => feed_id.to_string(),
        }
    }

    async fn set_episode_status(
        &self,
        feed_id: &str,
        episode_id: &str,
        status: EpisodeStatus,
    ) -> Result<()> {
        self.db
            .update_episode(feed_id, episode_id, |episode| {
                if !episode.status.can_transition(status) {
                    return Err(Error::InvalidTransition {
                        from: episode.status.to_string(),
                        to: status.to_string(),
                    });
                }
                episode.status = status;
                Ok(())
            })
            .await
    }

    async fn mark_downloaded(&self, feed_id: &str, episode_id: &str, size: i64) -> Result<()> {
        self.db
            .update_episode(feed_id, episode_id, |episode| {
                if !episode.status.can_transition(EpisodeStatus::Downloaded) {
                    return Err(Error::InvalidTransition {
                        from: episode.status.to_string(),
                        to: EpisodeStatus::Downloaded.to_string(),
                    });
                }
                episode.status = EpisodeStatus::Downloaded;
                episode.size = size;
                episode.error = String::new();
                Ok(())
            })
            .await
    }

    async fn mark_error(&self, feed_id: &str, episode_id: &str, message: &str) -> Result<()> {
        let message = message.to_string();
        self.db
            .update_episode(feed_id, episode_id, move |episode| {
                episode.status = EpisodeStatus::Error;
                episode.error = message;
                Ok(())
            })
            .await
    }
}

#[derive(Default)]
struct EpisodeStats {
    downloaded: usize,
    failed: usize,
    bytes: i64,
}

/// Final job status from the run's statistics.
///
/// A run that downloaded some but not all of its queued episodes without
/// recording failures was cut short (rate limiting, shutdown); that counts
/// as partial, not success.
fn final_status(stats: &JobStatistics) -> JobStatus {
    if stats.episodes_failed > 0 && stats.episodes_downloaded > 0 {
        JobStatus::Partial
    } else if stats.episodes_failed > 0 {
        JobStatus::Failed
    } else if stats.episodes_downloaded > 0 && stats.episodes_downloaded < stats.episodes_queued
    {
        JobStatus::Partial
    } else {
        JobStatus::Success
    }
}

/// Run a post-download hook through the shell with episode context in the
/// environment
async fn invoke_hook(command: &str, env: &[(&str, &str)]) -> Result<()> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let output = cmd.output().await.map_err(Error::Io)?;
    if !output.status.success() {
        return Err(Error::Hook {
            hook: command.to_string(),
            message: format!(
                "exit status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}
