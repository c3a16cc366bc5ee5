//! Shared fixtures for the end-to-end pipeline tests: a scripted listing
//! source and a mock downloader producing real files on disk.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use podsync::builder::ListingSource;
use podsync::config::{CustomFormat, CustomMetadata, FeedConfig, FeedFilters};
use podsync::db::Storage;
use podsync::error::{Error, Result};
use podsync::fs::{ArtifactStore, LocalStorage};
use podsync::history::HistoryRecorder;
use podsync::model::{
    Episode, Feed, Format, HistoryFilters, PlaylistSort, Quality, TriggerType,
};
use podsync::update::Updater;
use podsync::ytdl::{
    Downloader, MediaFile, PlaylistMetadata, Progress, ProgressSink,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the mock downloader should do for one episode
#[derive(Clone)]
pub enum DownloadScript {
    /// Produce a file of this many bytes
    Ok(usize),
    /// Fail with a download error
    Fail(&'static str),
    /// Fail with the rate-limit sentinel
    RateLimit,
}

/// Scripted listing source: tests set the episode list per run
#[derive(Default)]
pub struct ScriptedListing {
    episodes: Mutex<Vec<Episode>>,
}

impl ScriptedListing {
    pub fn set_episodes(&self, episodes: Vec<Episode>) {
        *self.episodes.lock().unwrap() = episodes;
    }
}

#[async_trait]
impl ListingSource for ScriptedListing {
    async fn build(&self, config: &FeedConfig) -> Result<Feed> {
        let episodes = self.episodes.lock().unwrap().clone();
        Ok(Feed {
            id: config.id.clone(),
            title: format!("{} channel", config.id),
            description: "scripted channel".into(),
            author: "tester".into(),
            item_url: config.url.clone(),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            episodes: episodes.into_iter().take(config.page_size).collect(),
            ..Default::default()
        })
    }
}

/// Mock downloader producing real temp files per its script
pub struct MockDownloader {
    scripts: Mutex<HashMap<String, DownloadScript>>,
    calls: AtomicUsize,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockDownloader {
    pub fn script(&self, episode_id: &str, script: DownloadScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(episode_id.to_string(), script);
    }

    /// Number of download invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(
        &self,
        feed: &FeedConfig,
        episode: &Episode,
        progress: ProgressSink,
    ) -> Result<MediaFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&episode.id)
            .cloned()
            .unwrap_or(DownloadScript::Ok(1024));

        match script {
            DownloadScript::RateLimit => Err(Error::TooManyRequests),
            DownloadScript::Fail(message) => Err(Error::Download(message.to_string())),
            DownloadScript::Ok(size) => {
                progress(Progress {
                    stage: podsync::progress::ProgressStage::Downloading,
                    percent: 50.0,
                    downloaded: (size / 2) as i64,
                    total: size as i64,
                    speed: "1.0MiB/s".into(),
                });

                let dir = tempfile::tempdir().map_err(Error::Io)?;
                let ext = match feed.format {
                    Format::Audio => "mp3",
                    Format::Video => "mp4",
                    Format::Custom => "mp4",
                };
                let path = dir.path().join(format!("{}.{ext}", episode.id));
                tokio::fs::write(&path, vec![b'x'; size])
                    .await
                    .map_err(Error::Io)?;

                progress(Progress {
                    stage: podsync::progress::ProgressStage::Encoding,
                    percent: 100.0,
                    downloaded: 0,
                    total: 0,
                    speed: String::new(),
                });

                let file = tokio::fs::File::open(&path).await.map_err(Error::Io)?;
                Ok(MediaFile::from_parts(file, dir))
            }
        }
    }

    async fn playlist_metadata(&self, _url: &str) -> Result<PlaylistMetadata> {
        Ok(PlaylistMetadata::default())
    }

    async fn playlist_entries(
        &self,
        _url: &str,
        _page_size: usize,
        _sort: PlaylistSort,
    ) -> Result<Vec<Episode>> {
        Ok(Vec::new())
    }
}

/// A fully wired updater over scratch storage
pub struct Harness {
    pub db: Arc<Storage>,
    pub store: Arc<LocalStorage>,
    pub updater: Arc<Updater>,
    pub listing: Arc<ScriptedListing>,
    pub downloader: Arc<MockDownloader>,
    pub data_dir: PathBuf,
    pub shutdown: CancellationToken,
    _dir: TempDir,
}

impl Harness {
    pub async fn new(config: FeedConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");

        let db = Arc::new(Storage::open(&dir.path().join("db")).await.unwrap());
        let store = Arc::new(LocalStorage::new(data_dir.clone()));
        let history = Arc::new(HistoryRecorder::new(Arc::clone(&db), true));
        let listing = Arc::new(ScriptedListing::default());
        let downloader = Arc::new(MockDownloader::default());
        let shutdown = CancellationToken::new();

        let mut feeds = BTreeMap::new();
        feeds.insert(config.id.clone(), config);

        let updater = Arc::new(Updater::new(
            feeds,
            "http://localhost:8080".into(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
            Arc::clone(&listing) as Arc<dyn ListingSource>,
            Arc::clone(&db),
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
            history,
            shutdown.clone(),
        ));

        Self {
            db,
            store,
            updater,
            listing,
            downloader,
            data_dir,
            shutdown,
            _dir: dir,
        }
    }

    /// Run one full feed update
    pub async fn run_update(&self, feed_id: &str) -> Result<()> {
        let config = self.updater.feed_config(feed_id).unwrap();
        self.updater.update(&config, TriggerType::Scheduled).await
    }

    pub async fn episode(&self, feed_id: &str, episode_id: &str) -> Episode {
        self.db.get_episode(feed_id, episode_id).await.unwrap()
    }

    /// All history entries, newest first
    pub async fn history_entries(&self) -> Vec<podsync::model::HistoryEntry> {
        let (entries, _) = self
            .db
            .list_history(&HistoryFilters::default(), 1, 100)
            .await
            .unwrap();
        entries
    }

    /// Published feed document, if present
    pub fn feed_xml(&self, feed_id: &str) -> Option<String> {
        std::fs::read_to_string(self.data_dir.join(format!("{feed_id}.xml"))).ok()
    }
}

/// A feed config with sensible test defaults
pub fn feed_config(id: &str) -> FeedConfig {
    FeedConfig {
        id: id.into(),
        url: "https://www.youtube.com/channel/UC123".into(),
        provider: None,
        update_period: std::time::Duration::from_secs(3600),
        cron_schedule: String::new(),
        page_size: 50,
        quality: Quality::High,
        format: Format::Audio,
        custom_format: CustomFormat::default(),
        max_height: 0,
        playlist_sort: PlaylistSort::Asc,
        filters: FeedFilters::default(),
        clean: None,
        custom: CustomMetadata::default(),
        opml: true,
        youtube_dl_args: Vec::new(),
        post_episode_download: Vec::new(),
    }
}

/// An episode as a listing would return it
pub fn listed_episode(id: &str, duration: i64, day: u32) -> Episode {
    Episode {
        id: id.into(),
        title: format!("Episode {id}"),
        description: format!("Description of {id}"),
        duration,
        video_url: format!("https://youtube.com/watch?v={id}"),
        pub_date: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
        ..Default::default()
    }
}
