//! # podsync
//!
//! Turn video-hosting channels (YouTube, Vimeo, SoundCloud, Twitch) into
//! podcast RSS feeds: periodically fetch channel listings, download media
//! through an external downloader, store artifacts, and publish an
//! iTunes-compatible feed document.
//!
//! ## Architecture
//!
//! The update engine is the core of the crate:
//! - [`db`] - typed storage gateway over a durable key-value layout
//! - [`fs`] - artifact store (local filesystem or S3-compatible)
//! - [`progress`] - in-memory download progress, pollable and streamable
//! - [`history`] - append-only job history with retention cleanup
//! - [`ytdl`] - driver around the external media downloader
//! - [`update`] - the per-feed pipeline (fetch, reconcile, filter,
//!   download, clean up, publish)
//! - [`scheduler`] - cron timer set feeding a bounded queue with one
//!   serializing worker
//!
//! Everything else ([`api`], [`app`]) is a thin facade over the engine.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podsync::{app::App, config::Config, run_with_shutdown};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = PathBuf::from("config.toml");
//!     let config = Config::load(&path)?;
//!     let app = App::new(config, path).await?;
//!
//!     // Runs until SIGINT/SIGTERM
//!     run_with_shutdown(app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API facade
pub mod api;
/// Process lifecycle
pub mod app;
/// Provider listing adapters
pub mod builder;
/// Configuration types
pub mod config;
/// Storage gateway
pub mod db;
/// Error types
pub mod error;
/// Feed helpers: naming, filters, document rendering
pub mod feed;
/// Artifact storage backends
pub mod fs;
/// Job history recording
pub mod history;
/// Core domain types
pub mod model;
/// In-memory download progress tracking
pub mod progress;
/// Feed update scheduling
pub mod scheduler;
/// The per-feed update pipeline
pub mod update;
/// Media downloader driver
pub mod ytdl;

// Re-export commonly used types
pub use app::App;
pub use config::Config;
pub use db::Storage;
pub use error::{ApiError, Error, Result, ToHttpStatus};
pub use history::HistoryRecorder;
pub use model::{Episode, EpisodeStatus, Feed, HistoryEntry, JobStatus, JobType, Provider};
pub use progress::{EpisodeProgress, FeedProgress, Tracker};
pub use scheduler::Scheduler;
pub use update::Updater;
pub use ytdl::{Downloader, YoutubeDl};

/// Run the app with graceful signal handling.
///
/// Waits for a termination signal, cancels the app's shutdown token, and
/// lets the run loop drain.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(app: App) -> Result<()> {
    let token = app.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });

    app.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // Signal registration may fail in restricted environments (containers,
    // tests).
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("received SIGTERM signal");
            } else {
                tracing::error!("could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C signal");
        }
    }
}
