//! Downloader argument construction.

use crate::config::FeedConfig;
use crate::model::{Episode, Format, Quality};
use std::path::Path;

/// Build the argument list for downloading one episode.
///
/// The format selector follows the feed's format/quality settings; feed
/// level extra arguments are appended before the fixed progress and output
/// flags so they can tweak behavior but not break progress parsing.
pub fn build_args(feed: &FeedConfig, episode: &Episode, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    match feed.format {
        Format::Video => {
            let format = match feed.quality {
                Quality::Low => {
                    "worstvideo[ext=mp4][vcodec^=avc1]+worstaudio[ext=m4a]\
                     /worst[ext=mp4][vcodec^=avc1]/worst[ext=mp4]/worst"
                        .to_string()
                }
                Quality::High if feed.max_height > 0 => format!(
                    "bestvideo[height<={h}][ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]\
                     /best[height<={h}][ext=mp4][vcodec^=avc1]/best[ext=mp4]/best",
                    h = feed.max_height
                ),
                Quality::High => {
                    "bestvideo[ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]\
                     /best[ext=mp4][vcodec^=avc1]/best[ext=mp4]/best"
                        .to_string()
                }
            };
            args.extend(["--format".to_string(), format]);
        }
        Format::Audio => {
            let format = match feed.quality {
                Quality::High => "bestaudio",
                Quality::Low => "worstaudio",
            };
            args.extend([
                "--extract-audio".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--format".to_string(),
                format.to_string(),
            ]);
        }
        Format::Custom => {
            args.extend([
                "--audio-format".to_string(),
                feed.custom_format.extension.clone(),
                "--format".to_string(),
                feed.custom_format.youtube_dl_format.clone(),
            ]);
        }
    }

    args.extend(feed.youtube_dl_args.iter().cloned());

    // Line-oriented progress output is what the parser expects.
    args.extend(["--progress".to_string(), "--newline".to_string()]);

    args.extend([
        "--output".to_string(),
        output.to_string_lossy().into_owned(),
        episode.video_url.clone(),
    ]);

    args
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomFormat;
    use std::path::PathBuf;

    fn feed(format: Format, quality: Quality) -> FeedConfig {
        FeedConfig {
            id: "bbc".into(),
            url: "https://www.youtube.com/channel/UC123".into(),
            provider: None,
            update_period: std::time::Duration::from_secs(3600),
            cron_schedule: String::new(),
            page_size: 50,
            quality,
            format,
            custom_format: CustomFormat::default(),
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

    fn episode() -> Episode {
        Episode {
            id: "vid1".into(),
            video_url: "https://youtube.com/watch?v=vid1".into(),
            ..Default::default()
        }
    }

    fn args_for(feed: &FeedConfig) -> Vec<String> {
        build_args(feed, &episode(), &PathBuf::from("/tmp/x/vid1.%(ext)s"))
    }

    #[test]
    fn video_high_selects_best_mp4() {
        let args = args_for(&feed(Format::Video, Quality::High));
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        let selector = &args[format_idx + 1];
        assert!(selector.starts_with("bestvideo[ext=mp4][vcodec^=avc1]"));
        assert!(!selector.contains("height<="));
    }

    #[test]
    fn video_high_with_max_height_clips_the_selector() {
        let mut config = feed(Format::Video, Quality::High);
        config.max_height = 720;
        let args = args_for(&config);
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert!(args[format_idx + 1].contains("height<=720"));
    }

    #[test]
    fn video_low_selects_worst_counterparts() {
        let args = args_for(&feed(Format::Video, Quality::Low));
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert!(args[format_idx + 1].starts_with("worstvideo"));
    }

    #[test]
    fn audio_extracts_mp3() {
        let args = args_for(&feed(Format::Audio, Quality::High));
        assert!(args.contains(&"--extract-audio".to_string()));
        let audio_idx = args.iter().position(|a| a == "--audio-format").unwrap();
        assert_eq!(args[audio_idx + 1], "mp3");
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[format_idx + 1], "bestaudio");
    }

    #[test]
    fn audio_low_selects_worstaudio() {
        let args = args_for(&feed(Format::Audio, Quality::Low));
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[format_idx + 1], "worstaudio");
    }

    #[test]
    fn custom_format_uses_configured_selector_and_extension() {
        let mut config = feed(Format::Custom, Quality::High);
        config.custom_format = CustomFormat {
            extension: "opus".into(),
            youtube_dl_format: "bestaudio[acodec=opus]".into(),
        };
        let args = args_for(&config);

        let audio_idx = args.iter().position(|a| a == "--audio-format").unwrap();
        assert_eq!(args[audio_idx + 1], "opus");
        let format_idx = args.iter().position(|a| a == "--format").unwrap();
        assert_eq!(args[format_idx + 1], "bestaudio[acodec=opus]");
    }

    #[test]
    fn feed_extra_args_come_before_progress_flags() {
        let mut config = feed(Format::Audio, Quality::High);
        config.youtube_dl_args = vec!["--cookies".into(), "/tmp/cookies.txt".into()];
        let args = args_for(&config);

        let cookies_idx = args.iter().position(|a| a == "--cookies").unwrap();
        let progress_idx = args.iter().position(|a| a == "--progress").unwrap();
        assert!(cookies_idx < progress_idx);
    }

    #[test]
    fn args_end_with_output_template_and_url() {
        let args = args_for(&feed(Format::Video, Quality::High));
        let n = args.len();
        assert_eq!(args[n - 3], "--output");
        assert_eq!(args[n - 2], "/tmp/x/vid1.%(ext)s");
        assert_eq!(args[n - 1], "https://youtube.com/watch?v=vid1");
        assert!(args.contains(&"--newline".to_string()));
    }
}
