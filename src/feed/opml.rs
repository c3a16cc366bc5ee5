//! Combined OPML rendering across feeds flagged for OPML inclusion.

use crate::config::FeedConfig;

/// Render the OPML document listing every feed with `opml = true`.
///
/// Each entry is `(config, title)`, where the title comes from the stored
/// feed record and falls back to the feed ID.
pub fn build_opml(feeds: &[(&FeedConfig, String)], hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('/');

    let mut out = String::with_capacity(512);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push('\n');
    out.push_str("<opml version=\"2.0\">\n");
    out.push_str("  <head>\n    <title>Podsync feeds</title>\n  </head>\n");
    out.push_str("  <body>\n");

    for (config, title) in feeds {
        if !config.opml {
            continue;
        }
        let title = if title.is_empty() { &config.id } else { title };
        out.push_str(&format!(
            "    <outline type=\"rss\" text=\"{text}\" title=\"{text}\" xmlUrl=\"{hostname}/{id}.xml\"/>\n",
            text = escape(title),
            id = config.id,
        ));
    }

    out.push_str("  </body>\n</opml>\n");
    out
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
