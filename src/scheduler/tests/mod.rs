use super::*;
use crate::builder::ListingSource;
use crate::db::Storage;
use crate::error::Result;
use crate::fs::LocalStorage;
use crate::history::HistoryRecorder;
use crate::model::{Episode, Feed, PlaylistSort};
use crate::ytdl::{Downloader, MediaFile, PlaylistMetadata, ProgressSink};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tempfile::TempDir;

struct EmptyListing;

#[async_trait]
impl ListingSource for EmptyListing {
    async fn build(&self, config: &FeedConfig) -> Result<Feed> {
        Ok(Feed {
            id: config.id.clone(),
            title: format!("{} title", config.id),
            ..Default::default()
        })
    }
}

struct NoDownloader;

#[async_trait]
impl Downloader for NoDownloader {
    async fn download(
        &self,
        _feed: &FeedConfig,
        _episode: &Episode,
        _progress: ProgressSink,
    ) -> Result<MediaFile> {
        Err(Error::Download("no downloads in scheduler tests".into()))
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

fn feed_config(id: &str, cron_schedule: &str) -> FeedConfig {
    FeedConfig {
        id: id.into(),
        url: "https://www.youtube.com/channel/UC123".into(),
        provider: None,
        update_period: Duration::from_secs(3600),
        cron_schedule: cron_schedule.into(),
        page_size: 10,
        quality: Default::default(),
        format: Default::default(),
        custom_format: Default::default(),
        max_height: 0,
        playlist_sort: Default::default(),
        filters: Default::default(),
        clean: None,
        custom: Default::default(),
        opml: false,
        youtube_dl_args: Vec::new(),
        post_episode_download: Vec::new(),
    }
}

async fn harness(
    configs: Vec<FeedConfig>,
    shutdown: CancellationToken,
) -> (Arc<Updater>, Arc<Storage>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Storage::open(&dir.path().join("db")).await.unwrap());
    let fs = Arc::new(LocalStorage::new(dir.path().join("data")));
    let history = Arc::new(HistoryRecorder::new(Arc::clone(&db), false));

    let feeds: BTreeMap<String, FeedConfig> = configs
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    let updater = Arc::new(Updater::new(
        feeds,
        "http://localhost:8080".into(),
        Arc::new(NoDownloader),
        Arc::new(EmptyListing),
        Arc::clone(&db),
        fs,
        history,
        shutdown,
    ));
    (updater, db, dir)
}

/// Poll until the feed record exists, proving an update ran
async fn wait_for_update(db: &Storage, feed_id: &str) -> bool {
    for _ in 0..60 {
        if db.get_feed(feed_id).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn interval_feed_gets_a_boot_time_kick() {
    let shutdown = CancellationToken::new();
    let config = feed_config("bbc", "");
    let (updater, db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    let scheduler = Arc::new(Scheduler::with_tick(
        updater,
        shutdown.clone(),
        Duration::from_secs(600),
    ));
    scheduler.register_feed(&config).unwrap();
    let (worker, timer) = scheduler.start().unwrap();

    // The tick is far away, so only the boot kick can have triggered this.
    assert!(
        wait_for_update(&db, "bbc").await,
        "interval feed must update immediately on startup"
    );

    shutdown.cancel();
    let _ = worker.await;
    let _ = timer.await;
}

#[tokio::test]
async fn explicit_cron_defers_the_first_run() {
    let shutdown = CancellationToken::new();
    // Fires at most once a year; never during this test.
    let config = feed_config("bbc", "0 0 1 1 *");
    let (updater, db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    let scheduler = Arc::new(Scheduler::with_tick(
        updater,
        shutdown.clone(),
        Duration::from_millis(50),
    ));
    scheduler.register_feed(&config).unwrap();
    let (worker, timer) = scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        db.get_feed("bbc").await.is_err(),
        "cron feed must wait for its next tick"
    );
    assert!(scheduler.next_fire("bbc").is_some());

    shutdown.cancel();
    let _ = worker.await;
    let _ = timer.await;
}

#[tokio::test]
async fn manual_refresh_enqueues_and_runs() {
    let shutdown = CancellationToken::new();
    let config = feed_config("bbc", "0 0 1 1 *");
    let (updater, db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    let scheduler = Arc::new(Scheduler::with_tick(
        updater,
        shutdown.clone(),
        Duration::from_secs(600),
    ));
    scheduler.register_feed(&config).unwrap();
    let (worker, timer) = scheduler.start().unwrap();

    scheduler.enqueue_refresh(config).unwrap();
    assert!(wait_for_update(&db, "bbc").await);

    shutdown.cancel();
    let _ = worker.await;
    let _ = timer.await;
}

#[tokio::test]
async fn full_queue_rejects_manual_refresh() {
    let shutdown = CancellationToken::new();
    let config = feed_config("bbc", "");
    let (updater, _db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    // No worker running, so the queue fills up at capacity.
    let scheduler = Arc::new(Scheduler::with_tick(
        updater,
        shutdown.clone(),
        Duration::from_secs(600),
    ));

    for _ in 0..QUEUE_CAPACITY {
        scheduler.enqueue_refresh(config.clone()).unwrap();
    }
    let err = scheduler.enqueue_refresh(config).unwrap_err();
    assert!(matches!(err, Error::ApiServer(_)));
}

#[tokio::test]
async fn collect_due_drops_fire_while_previous_run_is_in_flight() {
    let shutdown = CancellationToken::new();
    let config = feed_config("bbc", "");
    let (updater, _db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    let scheduler = Scheduler::with_tick(updater, shutdown, Duration::from_secs(600));

    let in_flight = Arc::new(AtomicBool::new(true));
    scheduler.lock_entries().insert(
        "bbc".into(),
        Entry {
            schedule: Schedule::Every(Duration::from_secs(60)),
            next_fire: Some(Utc::now() - chrono::Duration::seconds(5)),
            in_flight: Arc::clone(&in_flight),
        },
    );

    let due = scheduler.collect_due(Utc::now());
    assert!(due.is_empty(), "an in-flight entry must be dropped");

    let next = scheduler.next_fire("bbc").unwrap();
    assert!(next > Utc::now(), "the dropped fire still advances next_fire");

    // Once the worker clears the flag, the next due scan fires it.
    in_flight.store(false, Ordering::SeqCst);
    if let Some(entry) = scheduler.lock_entries().get_mut("bbc") {
        entry.next_fire = Some(Utc::now() - chrono::Duration::seconds(1));
    }
    let due = scheduler.collect_due(Utc::now());
    assert_eq!(due.len(), 1);
    assert!(in_flight.load(Ordering::SeqCst), "firing marks in-flight");
}

#[tokio::test]
async fn unregistered_feed_stops_firing() {
    let shutdown = CancellationToken::new();
    let config = feed_config("bbc", "");
    let (updater, _db, _dir) = harness(vec![config.clone()], shutdown.clone()).await;

    let scheduler = Scheduler::with_tick(updater, shutdown, Duration::from_secs(600));
    scheduler.register_feed(&config).unwrap();
    assert!(scheduler.next_fire("bbc").is_some());

    scheduler.unregister_feed("bbc");
    assert!(scheduler.next_fire("bbc").is_none());
    assert!(scheduler.collect_due(Utc::now()).is_empty());
}

#[tokio::test]
async fn start_twice_is_an_error() {
    let shutdown = CancellationToken::new();
    let (updater, _db, _dir) = harness(vec![], shutdown.clone()).await;

    let scheduler = Arc::new(Scheduler::with_tick(
        updater,
        shutdown.clone(),
        Duration::from_secs(600),
    ));
    let (worker, timer) = scheduler.start().unwrap();
    assert!(scheduler.start().is_err());

    shutdown.cancel();
    let _ = worker.await;
    let _ = timer.await;
}

#[test]
fn effective_schedule_distinguishes_cron_from_interval() {
    let (schedule, explicit) = effective_schedule(&feed_config("bbc", "0 9 * * *")).unwrap();
    assert!(explicit);
    assert!(matches!(schedule, Schedule::Cron(_)));

    let (schedule, explicit) = effective_schedule(&feed_config("bbc", "")).unwrap();
    assert!(!explicit);
    assert!(matches!(schedule, Schedule::Every(_)));

    assert!(effective_schedule(&feed_config("bbc", "bogus")).is_err());
}
