//! Media downloader driver.
//!
//! Wraps the external `yt-dlp` / `youtube-dl` binary:
//!
//! - binary discovery and a `--version` probe at startup (a missing binary
//!   refuses to start), plus a check that a transcoder (`ffmpeg` or
//!   `avconv`) is present
//! - an optional self-update loop, serialized against downloads through a
//!   dedicated mutex so the binary is never replaced mid-invocation
//! - playlist metadata and flat-playlist listing fetches via JSON dumps
//! - one-shot downloads into a scoped temporary directory, with progress
//!   parsed from the subprocess output and delivered to a per-call sink
//!
//! The module is split into focused submodules: [`args`] builds the
//! argument list, [`parse`] turns output lines into progress updates.

use crate::config::{DownloaderConfig, FeedConfig, UpdateChannel};
use crate::error::{Error, Result};
use crate::model::{Episode, PlaylistSort};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

pub mod args;
pub mod parse;

pub use parse::Progress;

/// How often the self-update loop runs
pub const UPDATE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Receives progress updates during one download.
///
/// The sink is an explicit argument of [`Downloader::download`], so the
/// update pipeline builds a fresh per-episode sink instead of mutating the
/// driver between episodes.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// A sink that discards every update
pub fn null_progress_sink() -> ProgressSink {
    Arc::new(|_| {})
}

/// Capability the update pipeline needs from the media downloader
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download one episode, streaming progress into `progress`.
    ///
    /// Returns a readable over the finished file that owns its scratch
    /// directory.
    async fn download(
        &self,
        feed: &FeedConfig,
        episode: &Episode,
        progress: ProgressSink,
    ) -> Result<MediaFile>;

    /// Fetch channel-level metadata for a playlist URL
    async fn playlist_metadata(&self, url: &str) -> Result<PlaylistMetadata>;

    /// Fetch the most recent `page_size` playlist entries as episode
    /// records, ordered per `sort`
    async fn playlist_entries(
        &self,
        url: &str,
        page_size: usize,
        sort: PlaylistSort,
    ) -> Result<Vec<Episode>>;
}

/// A thumbnail variant reported by the downloader
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PlaylistThumbnail {
    /// Thumbnail identifier
    #[serde(default)]
    pub id: String,
    /// Image URL
    #[serde(default)]
    pub url: String,
    /// Resolution label (e.g., "1280x720")
    #[serde(default)]
    pub resolution: String,
    /// Width in pixels
    #[serde(default)]
    pub width: u32,
    /// Height in pixels
    #[serde(default)]
    pub height: u32,
}

/// Channel-level metadata from a `--playlist-items 0 -J` dump
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct PlaylistMetadata {
    /// Playlist identifier
    #[serde(default)]
    pub id: String,
    /// Playlist title
    #[serde(default)]
    pub title: String,
    /// Playlist description
    #[serde(default)]
    pub description: String,
    /// Available thumbnails, smallest first
    #[serde(default)]
    pub thumbnails: Vec<PlaylistThumbnail>,
    /// Channel name
    #[serde(default)]
    pub channel: String,
    /// Channel identifier
    #[serde(default)]
    pub channel_id: String,
    /// Channel page URL
    #[serde(default)]
    pub channel_url: String,
    /// Canonical playlist page URL
    #[serde(default)]
    pub webpage_url: String,
}

/// A finished download: a readable over the media file that owns the
/// scratch directory it lives in. Dropping it removes the directory.
pub struct MediaFile {
    file: tokio::fs::File,
    _dir: tempfile::TempDir,
}

impl MediaFile {
    /// Wrap an already-downloaded file with the scratch directory that owns
    /// it. Useful for custom [`Downloader`] implementations.
    pub fn from_parts(file: tokio::fs::File, dir: tempfile::TempDir) -> Self {
        Self { file, _dir: dir }
    }
}

impl AsyncRead for MediaFile {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// Driver over the external downloader binary
pub struct YoutubeDl {
    path: PathBuf,
    timeout: Duration,
    update_channel: UpdateChannel,
    update_version: String,
    self_update: bool,
    /// Serializes self-updates against downloads so the binary is never
    /// replaced while a subprocess is running.
    update_lock: tokio::sync::Mutex<()>,
}

struct ExecOutput {
    stdout: String,
    stderr: String,
}

impl ExecOutput {
    fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

impl YoutubeDl {
    /// Discover the downloader binary and verify it runs.
    ///
    /// Fails when the binary (or a transcoder) cannot be found, which
    /// aborts startup.
    pub async fn new(config: &DownloaderConfig) -> Result<Self> {
        let (path, self_update) = match &config.custom_binary {
            Some(custom) => {
                // Custom forks manage their own updates.
                tracing::warn!(
                    path = %custom.display(),
                    "using custom downloader binary, turning self updates off"
                );
                (custom.clone(), false)
            }
            None => {
                let path = find_in_path("yt-dlp")
                    .or_else(|| find_in_path("youtube-dl"))
                    .ok_or_else(|| {
                        Error::ExternalTool("yt-dlp (or youtube-dl) binary not found".into())
                    })?;
                tracing::debug!(path = %path.display(), "found downloader binary");
                (path, config.self_update)
            }
        };

        let downloader = Self {
            path,
            timeout: Duration::from_secs(config.timeout_minutes * 60),
            update_channel: config.update_channel,
            update_version: config.update_version.clone(),
            self_update,
            update_lock: tokio::sync::Mutex::new(()),
        };

        let version = downloader.version().await?;
        tracing::info!(version, "using media downloader");

        ensure_transcoder().await?;

        Ok(downloader)
    }

    /// Downloader version from `--version`
    pub async fn version(&self) -> Result<String> {
        let output = self.exec(&["--version"]).await.map_err(|e| {
            Error::ExternalTool(format!("could not run downloader --version: {e}"))
        })?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run the self-update subcommand once
    pub async fn update(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;

        let args: Vec<&str> = if !self.update_version.is_empty() {
            tracing::info!(version = %self.update_version, "updating downloader to pinned version");
            vec!["--update-to", &self.update_version, "--verbose"]
        } else if self.update_channel != UpdateChannel::Stable {
            tracing::info!(channel = self.update_channel.as_str(), "updating downloader channel");
            vec!["--update-to", self.update_channel.as_str(), "--verbose"]
        } else {
            tracing::info!("updating downloader to latest stable version");
            vec!["--update", "--verbose"]
        };

        let output = self.exec(&args).await?;
        tracing::info!(output = %output.combined().trim(), "downloader update finished");
        Ok(())
    }

    /// Run the initial self-update, then repeat every 24 hours until
    /// shutdown. Returns `None` when self-updates are disabled.
    pub fn spawn_self_update(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if !self.self_update {
            return None;
        }

        let downloader = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(e) = downloader.update().await {
                tracing::error!(error = %e, "failed to update downloader at startup");
            }

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(UPDATE_PERIOD) => {
                        if let Err(e) = downloader.update().await {
                            tracing::error!(error = %e, "downloader self-update failed");
                        }
                    }
                }
            }
        }))
    }

    async fn exec(&self, args: &[&str]) -> Result<ExecOutput> {
        let mut cmd = Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Download(format!(
                    "downloader timed out after {} minute(s)",
                    self.timeout.as_secs() / 60
                ))
            })?
            .map_err(Error::Io)?;

        let result = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            return Err(translate_error(&result.combined()));
        }

        Ok(result)
    }
}

#[async_trait]
impl Downloader for YoutubeDl {
    /// Fetch the first `page_size` playlist entries as episode records.
    ///
    /// Uses a flat-playlist JSON dump; the window always covers the most
    /// recent entries, and `sort` controls the order within the window.
    async fn playlist_entries(
        &self,
        url: &str,
        page_size: usize,
        sort: PlaylistSort,
    ) -> Result<Vec<Episode>> {
        if page_size == 0 {
            return Ok(Vec::new());
        }

        let limit = format!("1:{page_size}");
        let _guard = self.update_lock.lock().await;
        let output = self
            .exec(&[
                "--flat-playlist",
                "--playlist-items",
                &limit,
                "-J",
                "-q",
                "--no-warnings",
                url,
            ])
            .await?;

        let playlist: FlatPlaylist = serde_json::from_str(output.stdout.trim())?;
        let mut episodes: Vec<Episode> = playlist
            .entries
            .into_iter()
            .filter(|entry| !entry.id.is_empty())
            .map(FlatEntry::into_episode)
            .collect();

        // Listings arrive newest-first; ascending means oldest-first.
        if sort == PlaylistSort::Asc {
            episodes.reverse();
        }

        Ok(episodes)
    }

    async fn download(
        &self,
        feed: &FeedConfig,
        episode: &Episode,
        progress: ProgressSink,
    ) -> Result<MediaFile> {
        // The scratch directory is removed on every exit path: on failure
        // when `dir` drops here, on success when the returned MediaFile
        // drops.
        let dir = tempfile::Builder::new().prefix("podsync-").tempdir()?;
        let output_template = dir.path().join(format!("{}.%(ext)s", episode.id));
        let args = args::build_args(feed, episode, &output_template);

        let _guard = self.update_lock.lock().await;

        tracing::debug!(episode_id = %episode.id, url = %episode.video_url, "invoking downloader");

        let mut cmd = Command::new(&self.path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::Io)?;

        // Progress lines appear on stderr for youtube-dl and stdout for
        // yt-dlp; scan both.
        let stderr_task = spawn_line_reader(child.stderr.take(), Some(progress.clone()));
        let stdout_task = spawn_line_reader(child.stdout.take(), Some(progress));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result.map_err(Error::Io)?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(Error::Download(format!(
                    "download timed out after {} minute(s)",
                    self.timeout.as_secs() / 60
                )));
            }
        };

        let stderr_output = stderr_task.await.unwrap_or_default();
        let stdout_output = stdout_task.await.unwrap_or_default();

        if !status.success() {
            return Err(translate_error(&format!("{stdout_output}{stderr_output}")));
        }

        let file_path = dir.path().join(format!("{}.{}", episode.id, feed.extension()));
        let file = tokio::fs::File::open(&file_path).await.map_err(|e| {
            Error::Download(format!(
                "downloader finished but produced no {}: {e}",
                file_path.display()
            ))
        })?;

        Ok(MediaFile { file, _dir: dir })
    }

    async fn playlist_metadata(&self, url: &str) -> Result<PlaylistMetadata> {
        tracing::info!(url, "fetching playlist metadata");

        let _guard = self.update_lock.lock().await;
        let output = self
            .exec(&["--playlist-items", "0", "-J", "-q", "--no-warnings", url])
            .await?;

        Ok(serde_json::from_str(output.stdout.trim())?)
    }
}

/// Spawn a task collecting lines from a subprocess pipe, feeding progress
/// lines into the sink along the way
fn spawn_line_reader<R>(
    pipe: Option<R>,
    progress: Option<ProgressSink>,
) -> tokio::task::JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut output = String::new();
        let Some(pipe) = pipe else {
            return output;
        };

        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(sink) = &progress {
                if let Some(update) = parse::parse_progress_line(&line) {
                    sink(update);
                }
            }
            output.push_str(&line);
            output.push('\n');
        }
        output
    })
}

/// Translate subprocess output into the right error kind.
///
/// `HTTP Error 429` is the provider rate-limiting us; callers stop further
/// downloads for the run but do not fail the job.
fn translate_error(output: &str) -> Error {
    if output.contains("HTTP Error 429") {
        return Error::TooManyRequests;
    }
    Error::Download(tail(output, 1000).trim().to_string())
}

/// Last `max` bytes of a string, on a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Search PATH for an executable
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Verify a transcoder is available; downloads cannot post-process without
/// one
async fn ensure_transcoder() -> Result<()> {
    for name in ["ffmpeg", "avconv"] {
        if let Some(path) = find_in_path(name) {
            let output = Command::new(&path)
                .arg("-version")
                .output()
                .await
                .map_err(Error::Io)?;
            let banner = String::from_utf8_lossy(&output.stdout);
            tracing::info!(
                transcoder = name,
                version = %banner.lines().next().unwrap_or(""),
                "found transcoder"
            );
            return Ok(());
        }
    }

    Err(Error::ExternalTool(
        "either ffmpeg or avconv is required".into(),
    ))
}

#[derive(Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    webpage_url: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    thumbnails: Vec<PlaylistThumbnail>,
}

impl FlatEntry {
    fn into_episode(self) -> Episode {
        let video_url = if !self.url.is_empty() {
            self.url
        } else {
            self.webpage_url
        };

        // Thumbnails arrive smallest first; take the largest.
        let thumbnail = self
            .thumbnails
            .last()
            .map(|t| t.url.clone())
            .unwrap_or_default();

        let pub_date = self
            .timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        Episode {
            id: self.id,
            title: self.title,
            description: self.description,
            thumbnail,
            duration: self.duration.unwrap_or(0.0) as i64,
            video_url,
            pub_date,
            size: 0,
            status: Default::default(),
            error: String::new(),
        }
    }
}
