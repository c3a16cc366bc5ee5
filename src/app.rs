//! Process lifecycle: component construction and the run loop.
//!
//! Startup order matters: the downloader binary is probed first (a missing
//! binary is an unrecoverable startup failure), then the durable store and
//! artifact store open, then the updater and scheduler are wired together.
//! The app runs until its cancellation token fires, then shuts down
//! gracefully and closes the store.

use crate::api::{start_api_server, AppState};
use crate::builder::ProviderRegistry;
use crate::config::Config;
use crate::db::Storage;
use crate::error::Result;
use crate::history::HistoryRecorder;
use crate::model::TriggerType;
use crate::scheduler::Scheduler;
use crate::update::Updater;
use crate::ytdl::{Downloader, YoutubeDl};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often old history entries are cleaned up
const HISTORY_CLEANUP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// The assembled podsync process
pub struct App {
    state: AppState,
    downloader: Arc<YoutubeDl>,
    db: Arc<Storage>,
    shutdown: CancellationToken,
}

impl App {
    /// Construct every component from the loaded configuration.
    ///
    /// Fails on unrecoverable problems: missing downloader binary, invalid
    /// storage configuration, or an unopenable database.
    pub async fn new(config: Config, config_path: PathBuf) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let downloader = Arc::new(YoutubeDl::new(&config.downloader).await?);

        let db = Arc::new(Storage::open(&config.database.dir).await?);
        let artifacts = crate::fs::from_config(&config.storage)?;

        let history = Arc::new(HistoryRecorder::new(
            Arc::clone(&db),
            config.history.enabled,
        ));
        tracing::info!(
            enabled = config.history.enabled,
            retention_days = config.history.retention_days,
            max_entries = config.history.max_entries,
            "history tracking"
        );

        let listings = Arc::new(ProviderRegistry::new(
            Arc::clone(&downloader) as Arc<dyn Downloader>,
            &config.tokens,
        ));

        let updater = Arc::new(Updater::new(
            config.feeds.clone(),
            config.server.hostname.clone(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
            listings,
            Arc::clone(&db),
            artifacts,
            Arc::clone(&history),
            shutdown.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(Arc::clone(&updater), shutdown.clone()));

        let state = AppState {
            config: Arc::new(std::sync::RwLock::new(config)),
            config_path,
            db: Arc::clone(&db),
            progress: updater.progress_tracker(),
            updater,
            scheduler,
            history,
            shutdown: shutdown.clone(),
        };

        Ok(Self {
            state,
            downloader,
            db,
            shutdown,
        })
    }

    /// The root cancellation token; cancelling it shuts the app down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Shared API state, exposed for embedding and tests
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run one round of feed updates and return.
    ///
    /// Useful for cron-driven deployments that prefer an external
    /// scheduler.
    pub async fn run_headless(&self) -> Result<()> {
        for config in self.state.updater.all_feed_configs() {
            if let Err(e) = self
                .state
                .updater
                .update(&config, TriggerType::Scheduled)
                .await
            {
                tracing::error!(feed_id = %config.id, error = %e, "failed to update feed");
            }
        }
        self.db.close().await;
        Ok(())
    }

    /// Run until the cancellation token fires, then shut down gracefully
    pub async fn run(&self) -> Result<()> {
        let _self_update = self.downloader.spawn_self_update(self.shutdown.clone());

        for config in self.state.updater.all_feed_configs() {
            self.state.scheduler.register_feed(&config)?;
        }
        let (worker, timer) = self.state.scheduler.start()?;

        let cleanup = self.spawn_history_cleanup();

        let api = tokio::spawn(start_api_server(self.state.clone()));

        self.shutdown.cancelled().await;
        tracing::info!("shutting down");

        // The worker finishes its current feed update before exiting;
        // in-flight downloads are bounded by the per-download timeout.
        let _ = worker.await;
        let _ = timer.await;
        let _ = cleanup.await;
        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "API server error during shutdown"),
            Err(e) => tracing::error!(error = %e, "API server task panicked"),
        }

        self.db.close().await;
        tracing::info!("gracefully stopped");
        Ok(())
    }

    /// Apply the history retention policy at startup and then once a day
    fn spawn_history_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let history = Arc::clone(&self.state.history);
        let config = self.state.config_snapshot().history;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = history
                    .cleanup_old_entries(config.retention_days, config.max_entries)
                    .await
                {
                    tracing::warn!(error = %e, "history cleanup failed");
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(HISTORY_CLEANUP_PERIOD) => {}
                }
            }
        })
    }
}
