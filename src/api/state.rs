//! Shared state handed to every API handler.

use crate::config::Config;
use crate::db::Storage;
use crate::history::HistoryRecorder;
use crate::progress::Tracker;
use crate::scheduler::Scheduler;
use crate::update::Updater;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// State shared by all API handlers.
///
/// Cloning is cheap; everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration; config-update handlers mutate it
    pub config: Arc<RwLock<Config>>,
    /// Path of the configuration file for rewrites
    pub config_path: PathBuf,
    /// Durable store
    pub db: Arc<Storage>,
    /// The update pipeline
    pub updater: Arc<Updater>,
    /// The cron scheduler and update queue
    pub scheduler: Arc<Scheduler>,
    /// Live download progress
    pub progress: Arc<Tracker>,
    /// Job history recorder
    pub history: Arc<HistoryRecorder>,
    /// Root cancellation token; the restart endpoint cancels it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Snapshot of the current configuration
    pub fn config_snapshot(&self) -> Config {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the configuration under the write lock
    pub fn with_config_mut<R>(&self, f: impl FnOnce(&mut Config) -> R) -> R {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        f(&mut config)
    }
}
