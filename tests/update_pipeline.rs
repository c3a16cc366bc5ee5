//! End-to-end pipeline scenarios over scratch storage, a scripted listing
//! source and a mock downloader.

mod common;

use common::{feed_config, listed_episode, DownloadScript, Harness};
use podsync::config::CleanupConfig;
use podsync::fs::ArtifactStore;
use podsync::model::{EpisodeStatus, JobStatus, JobType};

// ---------------------------------------------------------------------------
// Scenario: fresh feed, three episodes, all succeed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_feed_downloads_every_episode() {
    let harness = Harness::new(feed_config("f1")).await;
    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 300, 2),
        listed_episode("c", 60, 3),
    ]);
    harness.downloader.script("a", DownloadScript::Ok(1000));
    harness.downloader.script("b", DownloadScript::Ok(2000));
    harness.downloader.script("c", DownloadScript::Ok(3000));

    harness.run_update("f1").await.unwrap();

    for (id, size) in [("a", 1000), ("b", 2000), ("c", 3000)] {
        let episode = harness.episode("f1", id).await;
        assert_eq!(episode.status, EpisodeStatus::Downloaded, "episode {id}");
        assert_eq!(episode.size, size);

        // The committed artifact matches the stored size.
        let stored = harness
            .store
            .size(&format!("f1/{id}.mp3"))
            .await
            .unwrap();
        assert_eq!(stored as i64, size);
    }

    assert!(harness.data_dir.join("f1.xml").exists());
    assert!(harness.data_dir.join("podsync.opml").exists());

    let entries = harness.history_entries().await;
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.job_type, JobType::FeedUpdate);
    assert_eq!(entry.status, JobStatus::Success);
    assert_eq!(entry.statistics.episodes_queued, 3);
    assert_eq!(entry.statistics.episodes_downloaded, 3);
    assert_eq!(entry.statistics.episodes_failed, 0);
    assert_eq!(entry.statistics.bytes_downloaded, 6000);
    assert_eq!(entry.statistics.episode_details.len(), 3);
    assert!(entry.end_time.unwrap() >= entry.start_time);
}

#[tokio::test]
async fn published_document_lists_downloaded_episodes() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);

    harness.run_update("f1").await.unwrap();

    let xml = harness.feed_xml("f1").unwrap();
    assert!(xml.contains("<guid>a</guid>"));
    assert!(xml.contains("http://localhost:8080/f1/a.mp3"));
}

// ---------------------------------------------------------------------------
// Scenario: filters reject short episodes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filter_marks_short_episodes_ignored() {
    let mut config = feed_config("f1");
    config.filters.min_duration = 120;
    let harness = Harness::new(config).await;

    harness.listing.set_episodes(vec![
        listed_episode("a", 60, 1),
        listed_episode("b", 200, 2),
    ]);

    harness.run_update("f1").await.unwrap();

    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Ignored,
        "rejected episode is persisted as ignored"
    );
    assert_eq!(
        harness.episode("f1", "b").await.status,
        EpisodeStatus::Downloaded
    );

    let entries = harness.history_entries().await;
    let stats = &entries[0].statistics;
    assert_eq!(stats.episodes_queued, 1);
    assert_eq!(stats.episodes_downloaded, 1);
    assert_eq!(stats.episodes_ignored, 1);
}

#[tokio::test]
async fn ignored_episodes_are_not_reevaluated_on_later_runs() {
    let mut config = feed_config("f1");
    config.filters.min_duration = 120;
    let harness = Harness::new(config).await;

    harness
        .listing
        .set_episodes(vec![listed_episode("a", 60, 1)]);
    harness.run_update("f1").await.unwrap();
    harness.run_update("f1").await.unwrap();

    let entries = harness.history_entries().await;
    assert_eq!(entries.len(), 2);
    // Only the first run marks the episode; the second sees it already
    // ignored.
    let second_run = &entries[0].statistics;
    assert_eq!(second_run.episodes_ignored, 0);
}

#[tokio::test]
async fn inverted_duration_bounds_ignore_everything() {
    let mut config = feed_config("f1");
    config.filters.min_duration = 300;
    config.filters.max_duration = 120;
    let harness = Harness::new(config).await;

    harness.listing.set_episodes(vec![
        listed_episode("a", 60, 1),
        listed_episode("b", 200, 2),
        listed_episode("c", 400, 3),
    ]);

    harness.run_update("f1").await.unwrap();

    for id in ["a", "b", "c"] {
        assert_eq!(
            harness.episode("f1", id).await.status,
            EpisodeStatus::Ignored,
            "episode {id}"
        );
    }
    assert_eq!(harness.downloader.calls(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: rate limit mid-run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_halts_downloads_but_still_publishes() {
    let harness = Harness::new(feed_config("f1")).await;
    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
        listed_episode("c", 120, 3),
    ]);
    harness.downloader.script("b", DownloadScript::RateLimit);

    harness.run_update("f1").await.unwrap();

    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Downloaded
    );
    assert_eq!(
        harness.episode("f1", "b").await.status,
        EpisodeStatus::Queued,
        "rate-limited episode is not marked failed"
    );
    assert_eq!(
        harness.episode("f1", "c").await.status,
        EpisodeStatus::Queued,
        "episodes after the rate limit stay queued"
    );
    assert!(
        harness.episode("f1", "b").await.error.is_empty(),
        "no error message for a rate-limited episode"
    );

    assert!(
        harness.feed_xml("f1").is_some(),
        "the feed document is still rebuilt"
    );

    let entries = harness.history_entries().await;
    let entry = &entries[0];
    assert_eq!(entry.status, JobStatus::Partial);
    assert_eq!(entry.statistics.episodes_downloaded, 1);
    assert_eq!(entry.statistics.episodes_failed, 0);
    assert!(entry.error.is_empty());
}

#[tokio::test]
async fn failed_download_records_error_and_continues() {
    let harness = Harness::new(feed_config("f1")).await;
    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
    ]);
    harness.downloader.script("a", DownloadScript::Fail("video unavailable"));

    harness.run_update("f1").await.unwrap();

    let a = harness.episode("f1", "a").await;
    assert_eq!(a.status, EpisodeStatus::Error);
    assert!(a.error.contains("video unavailable"));

    assert_eq!(
        harness.episode("f1", "b").await.status,
        EpisodeStatus::Downloaded,
        "the run continues past a failed episode"
    );

    let entries = harness.history_entries().await;
    assert_eq!(entries[0].status, JobStatus::Partial);
    assert_eq!(entries[0].statistics.episodes_failed, 1);
}

// ---------------------------------------------------------------------------
// Scenario: blocking sticks through refreshes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocked_episode_stays_blocked_through_updates() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);

    harness.run_update("f1").await.unwrap();
    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Downloaded
    );

    harness.updater.block_episode("f1", "a").await.unwrap();
    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Blocked
    );
    assert!(
        harness.store.size("f1/a.mp3").await.is_err(),
        "blocking removes the artifact"
    );

    // The listing still returns the episode; the block must survive.
    harness.run_update("f1").await.unwrap();
    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Blocked
    );
    assert!(
        harness.store.size("f1/a.mp3").await.is_err(),
        "the blocked episode is not re-downloaded"
    );

    let xml = harness.feed_xml("f1").unwrap();
    assert!(
        !xml.contains("<guid>a</guid>"),
        "blocked episodes are not published"
    );

    let entries = harness.history_entries().await;
    let blocks: Vec<_> = entries
        .iter()
        .filter(|e| e.job_type == JobType::EpisodeBlock)
        .collect();
    let updates: Vec<_> = entries
        .iter()
        .filter(|e| e.job_type == JobType::FeedUpdate)
        .collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(updates.len(), 2);
}

#[tokio::test]
async fn blocking_an_unknown_episode_creates_a_sticky_stub() {
    let harness = Harness::new(feed_config("f1")).await;

    // Block before the episode was ever listed.
    harness.listing.set_episodes(vec![]);
    harness.run_update("f1").await.unwrap();
    harness.updater.block_episode("f1", "future").await.unwrap();

    // The episode then appears upstream; the stub must filter it out.
    harness
        .listing
        .set_episodes(vec![listed_episode("future", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    assert_eq!(
        harness.episode("f1", "future").await.status,
        EpisodeStatus::Blocked
    );
    assert_eq!(harness.downloader.calls(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: cleanup keeps the newest N
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_keeps_the_two_newest_downloads() {
    let mut config = feed_config("f1");
    config.clean = Some(CleanupConfig { keep_last: 2 });
    let harness = Harness::new(config).await;

    harness.listing.set_episodes(vec![
        listed_episode("t1", 120, 1),
        listed_episode("t2", 120, 2),
        listed_episode("t3", 120, 3),
        listed_episode("t4", 120, 4),
    ]);

    harness.run_update("f1").await.unwrap();

    for id in ["t3", "t4"] {
        let episode = harness.episode("f1", id).await;
        assert_eq!(episode.status, EpisodeStatus::Downloaded, "episode {id}");
        assert!(harness.store.size(&format!("f1/{id}.mp3")).await.is_ok());
    }

    for id in ["t1", "t2"] {
        let episode = harness.episode("f1", id).await;
        assert_eq!(episode.status, EpisodeStatus::Cleaned, "episode {id}");
        assert!(episode.title.is_empty(), "cleaned title is cleared");
        assert!(episode.description.is_empty());
        assert!(
            harness.store.size(&format!("f1/{id}.mp3")).await.is_err(),
            "cleaned artifact is removed"
        );
    }
}

#[tokio::test]
async fn keep_last_zero_keeps_everything() {
    let mut config = feed_config("f1");
    config.clean = Some(CleanupConfig { keep_last: 0 });
    let harness = Harness::new(config).await;

    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
        listed_episode("c", 120, 3),
    ]);

    harness.run_update("f1").await.unwrap();

    for id in ["a", "b", "c"] {
        assert_eq!(
            harness.episode("f1", id).await.status,
            EpisodeStatus::Downloaded,
            "episode {id}"
        );
    }
}

// ---------------------------------------------------------------------------
// Reconciliation and idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_undownloaded_episodes_are_garbage_collected() {
    let harness = Harness::new(feed_config("f1")).await;

    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
    ]);
    harness.downloader.script("b", DownloadScript::Fail("gone upstream"));
    harness.run_update("f1").await.unwrap();
    assert_eq!(
        harness.episode("f1", "b").await.status,
        EpisodeStatus::Error
    );

    // Upstream removed "b"; since it never downloaded, the record goes.
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    assert!(harness.db.get_episode("f1", "b").await.is_err());
    assert!(harness.db.get_episode("f1", "a").await.is_ok());
}

#[tokio::test]
async fn downloaded_episodes_survive_disappearing_from_the_listing() {
    let harness = Harness::new(feed_config("f1")).await;

    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    harness
        .listing
        .set_episodes(vec![listed_episode("b", 120, 2)]);
    harness.run_update("f1").await.unwrap();

    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Downloaded,
        "downloaded records are preserved through reconciliation"
    );
}

#[tokio::test]
async fn running_update_twice_is_idempotent() {
    let harness = Harness::new(feed_config("f1")).await;
    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
    ]);

    harness.run_update("f1").await.unwrap();
    let first_calls = harness.downloader.calls();
    let first_xml = harness.feed_xml("f1").unwrap();

    harness.run_update("f1").await.unwrap();
    let second_xml = harness.feed_xml("f1").unwrap();

    assert_eq!(
        harness.downloader.calls(),
        first_calls,
        "no re-downloads when nothing changed upstream"
    );

    // Identical modulo the lastBuildDate timestamp.
    let strip = |xml: &str| {
        xml.lines()
            .filter(|line| !line.contains("lastBuildDate"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(strip(&first_xml), strip(&second_xml));
}

#[tokio::test]
async fn second_run_restores_record_for_existing_artifact() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    // Lose the record state but keep the artifact; re-running must notice
    // the file and mark the episode downloaded without re-invoking the
    // downloader.
    harness
        .db
        .update_episode("f1", "a", |ep| {
            ep.status = EpisodeStatus::New;
            Ok(())
        })
        .await
        .unwrap();
    let calls = harness.downloader.calls();

    harness.run_update("f1").await.unwrap();

    let episode = harness.episode("f1", "a").await;
    assert_eq!(episode.status, EpisodeStatus::Downloaded);
    assert!(episode.size > 0);
    assert_eq!(harness.downloader.calls(), calls);
}

// ---------------------------------------------------------------------------
// Boundary: page_size
// ---------------------------------------------------------------------------

#[tokio::test]
async fn page_size_zero_downloads_nothing_but_publishes() {
    let mut config = feed_config("f1");
    config.page_size = 0;
    let harness = Harness::new(config).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);

    harness.run_update("f1").await.unwrap();

    assert_eq!(harness.downloader.calls(), 0);
    assert!(harness.feed_xml("f1").is_some());
}

#[tokio::test]
async fn page_size_bounds_the_download_list() {
    let mut config = feed_config("f1");
    config.page_size = 2;
    let harness = Harness::new(config).await;
    harness.listing.set_episodes(vec![
        listed_episode("a", 120, 1),
        listed_episode("b", 120, 2),
        listed_episode("c", 120, 3),
    ]);

    harness.run_update("f1").await.unwrap();

    assert_eq!(harness.downloader.calls(), 2);
    let entries = harness.history_entries().await;
    assert_eq!(entries[0].statistics.episodes_queued, 2);
}

// ---------------------------------------------------------------------------
// Episode-scoped operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_with_existing_artifact_skips_the_downloader() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();
    let calls = harness.downloader.calls();

    harness.updater.retry_episode("f1", "a").await.unwrap();

    assert_eq!(
        harness.downloader.calls(),
        calls,
        "an artifact on disk short-circuits the retry"
    );
    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Downloaded
    );

    let entries = harness.history_entries().await;
    let retry = entries
        .iter()
        .find(|e| e.job_type == JobType::EpisodeRetry)
        .unwrap();
    assert_eq!(retry.status, JobStatus::Success);
}

#[tokio::test]
async fn retry_after_failure_downloads_again() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.downloader.script("a", DownloadScript::Fail("flaky"));
    harness.run_update("f1").await.unwrap();
    assert_eq!(harness.episode("f1", "a").await.status, EpisodeStatus::Error);

    harness.downloader.script("a", DownloadScript::Ok(500));
    harness.updater.retry_episode("f1", "a").await.unwrap();

    let episode = harness.episode("f1", "a").await;
    assert_eq!(episode.status, EpisodeStatus::Downloaded);
    assert_eq!(episode.size, 500);
    assert!(episode.error.is_empty());
}

#[tokio::test]
async fn delete_episode_removes_record_and_artifact() {
    let harness = Harness::new(feed_config("f1")).await;
    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    harness.updater.delete_episode("f1", "a").await.unwrap();

    assert!(harness.db.get_episode("f1", "a").await.is_err());
    assert!(harness.store.size("f1/a.mp3").await.is_err());

    let entries = harness.history_entries().await;
    let delete = entries
        .iter()
        .find(|e| e.job_type == JobType::EpisodeDelete)
        .unwrap();
    assert_eq!(delete.status, JobStatus::Success);
    assert_eq!(delete.episode_id, "a");
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn post_download_hooks_receive_episode_context() {
    let mut config = feed_config("f1");
    let hook_dir = tempfile::tempdir().unwrap();
    let out = hook_dir.path().join("hook.out");
    config.post_episode_download = vec![format!(
        "echo \"$EPISODE_FILE|$FEED_NAME|$EPISODE_TITLE\" >> {}",
        out.display()
    )];
    let harness = Harness::new(config).await;

    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    let content = std::fs::read_to_string(&out).unwrap();
    assert_eq!(content.trim(), "f1/a.mp3|f1|Episode a");
}

#[tokio::test]
async fn failing_hook_does_not_fail_the_episode() {
    let mut config = feed_config("f1");
    config.post_episode_download = vec!["exit 1".to_string()];
    let harness = Harness::new(config).await;

    harness
        .listing
        .set_episodes(vec![listed_episode("a", 120, 1)]);
    harness.run_update("f1").await.unwrap();

    assert_eq!(
        harness.episode("f1", "a").await.status,
        EpisodeStatus::Downloaded
    );
    let entries = harness.history_entries().await;
    assert_eq!(entries[0].status, JobStatus::Success);
}
