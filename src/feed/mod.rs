//! Feed-level helpers: artifact naming, episode filters, and rendering of
//! the published podcast XML and OPML documents.

use crate::config::FeedConfig;
use crate::model::Episode;

mod filters;
mod opml;
mod xml;

pub use filters::match_filters;
pub use opml::build_opml;
pub use xml::build_feed_xml;

/// File name of an episode's artifact inside the feed's directory
pub fn episode_name(config: &FeedConfig, episode: &Episode) -> String {
    format!("{}.{}", episode.id, config.extension())
}

/// Artifact store path of an episode's media file
pub fn episode_path(config: &FeedConfig, episode: &Episode) -> String {
    format!("{}/{}", config.id, episode_name(config, episode))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Format;

    #[test]
    fn episode_name_follows_feed_format() {
        let mut config = FeedConfig {
            id: "bbc".into(),
            url: "https://youtube.com/c/x".into(),
            provider: None,
            update_period: std::time::Duration::from_secs(3600),
            cron_schedule: String::new(),
            page_size: 50,
            quality: Default::default(),
            format: Format::Audio,
            custom_format: Default::default(),
            max_height: 0,
            playlist_sort: Default::default(),
            filters: Default::default(),
            clean: None,
            custom: Default::default(),
            opml: false,
            youtube_dl_args: Vec::new(),
            post_episode_download: Vec::new(),
        };
        let episode = Episode {
            id: "vid1".into(),
            ..Default::default()
        };

        assert_eq!(episode_name(&config, &episode), "vid1.mp3");
        assert_eq!(episode_path(&config, &episode), "bbc/vid1.mp3");

        config.format = Format::Video;
        assert_eq!(episode_name(&config, &episode), "vid1.mp4");
    }
}
