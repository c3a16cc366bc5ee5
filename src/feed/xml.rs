//! iTunes-compatible podcast RSS rendering.
//!
//! The document is built from the stored feed record plus its episodes;
//! only downloaded episodes are listed. Output is deterministic for a given
//! feed state so re-publishing an unchanged feed writes identical bytes.

use crate::config::FeedConfig;
use crate::feed::episode_name;
use crate::model::{Episode, EpisodeStatus, Feed};

/// Render the podcast XML document for one feed.
///
/// `hostname` is the public URL prefix enclosure links are built from.
pub fn build_feed_xml(feed: &Feed, config: &FeedConfig, hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('/');

    let title = pick(&config.custom.title, &feed.title);
    let description = pick(&config.custom.description, &feed.description);
    let author = pick(&config.custom.author, &feed.author);
    let cover_art = pick(&config.custom.cover_art, &feed.cover_art);
    let link = pick(&config.custom.link, &feed.item_url);
    let language = pick(&config.custom.language, "en");

    let mut out = String::with_capacity(4096);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str(
        r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">"#,
    );
    out.push('\n');
    out.push_str("  <channel>\n");

    tag(&mut out, 4, "title", title);
    tag(&mut out, 4, "link", link);
    tag(&mut out, 4, "description", description);
    tag(&mut out, 4, "language", language);
    tag(&mut out, 4, "generator", "podsync");

    if let Some(updated_at) = feed.updated_at {
        tag(&mut out, 4, "lastBuildDate", &updated_at.to_rfc2822());
    }

    if !author.is_empty() {
        tag(&mut out, 4, "itunes:author", author);
    }
    out.push_str(&format!(
        "    <itunes:explicit>{}</itunes:explicit>\n",
        if config.custom.explicit { "yes" } else { "no" }
    ));
    if !cover_art.is_empty() {
        out.push_str(&format!(
            "    <itunes:image href=\"{}\"/>\n",
            escape(cover_art)
        ));
    }
    if !config.custom.category.is_empty() {
        out.push_str(&format!(
            "    <itunes:category text=\"{}\">",
            escape(&config.custom.category)
        ));
        if config.custom.subcategories.is_empty() {
            out.push_str("</itunes:category>\n");
        } else {
            out.push('\n');
            for sub in &config.custom.subcategories {
                out.push_str(&format!(
                    "      <itunes:category text=\"{}\"/>\n",
                    escape(sub)
                ));
            }
            out.push_str("    </itunes:category>\n");
        }
    }
    if !config.custom.owner_name.is_empty() || !config.custom.owner_email.is_empty() {
        out.push_str("    <itunes:owner>\n");
        tag(&mut out, 6, "itunes:name", &config.custom.owner_name);
        tag(&mut out, 6, "itunes:email", &config.custom.owner_email);
        out.push_str("    </itunes:owner>\n");
    }

    // Newest first, like podcast clients expect.
    let mut downloaded: Vec<&Episode> = feed
        .episodes
        .iter()
        .filter(|ep| ep.status == EpisodeStatus::Downloaded)
        .collect();
    downloaded.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(a.id.cmp(&b.id)));

    for episode in downloaded {
        let enclosure_url = format!(
            "{hostname}/{}/{}",
            config.id,
            episode_name(config, episode)
        );

        out.push_str("    <item>\n");
        tag(&mut out, 6, "title", &episode.title);
        tag(&mut out, 6, "guid", &episode.id);
        tag(&mut out, 6, "link", &episode.video_url);
        tag(&mut out, 6, "description", &episode.description);
        tag(&mut out, 6, "pubDate", &episode.pub_date.to_rfc2822());
        out.push_str(&format!(
            "      <enclosure url=\"{}\" length=\"{}\" type=\"{}\"/>\n",
            escape(&enclosure_url),
            episode.size,
            mime_type(config.extension())
        ));
        tag(&mut out, 6, "itunes:duration", &format_duration(episode.duration));
        if !episode.thumbnail.is_empty() {
            out.push_str(&format!(
                "      <itunes:image href=\"{}\"/>\n",
                escape(&episode.thumbnail)
            ));
        }
        out.push_str("    </item>\n");
    }

    out.push_str("  </channel>\n</rss>\n");
    out
}

fn pick<'a>(override_value: &'a str, fallback: &'a str) -> &'a str {
    if override_value.is_empty() {
        fallback
    } else {
        override_value
    }
}

fn tag(out: &mut String, indent: usize, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push_str(&" ".repeat(indent));
    out.push_str(&format!("<{name}>{}</{name}>\n", escape(value)));
}

/// MIME type for an artifact extension
pub fn mime_type(extension: &str) -> String {
    match extension {
        "mp4" => "video/mp4".to_string(),
        "mp3" => "audio/mpeg".to_string(),
        "m4a" => "audio/mp4".to_string(),
        "opus" | "ogg" => "audio/ogg".to_string(),
        other => format!("audio/{other}"),
    }
}

/// `HH:MM:SS` duration formatting for iTunes clients
fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
