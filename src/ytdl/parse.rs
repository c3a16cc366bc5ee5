//! Progress parsing for downloader output lines.
//!
//! The downloader is invoked with `--progress --newline`, producing lines
//! like:
//!
//! ```text
//! [download]   45.2% of 10.50MiB at 1.23MiB/s ETA 00:04
//! [download] 100% of 10.50MiB in 00:08
//! [ffmpeg] Destination: /tmp/file.mp3
//! ```

use crate::progress::ProgressStage;
use regex::Regex;
use std::sync::OnceLock;

/// One parsed progress update
#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    /// Stage the download is in
    pub stage: ProgressStage,
    /// Percent complete (0-100)
    pub percent: f64,
    /// Bytes downloaded so far (derived from percent and total)
    pub downloaded: i64,
    /// Total size estimate in bytes
    pub total: i64,
    /// Speed string as printed by the downloader (e.g., "1.2MiB/s")
    pub speed: String,
}

fn download_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        Regex::new(
            r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*)(MiB|KiB|GiB|B)(?:\s+at\s+(\d+\.?\d*)(MiB|KiB|GiB|B)/s)?",
        )
        .unwrap()
    })
}

fn encoding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        Regex::new(r"\[(ffmpeg|ExtractAudio|VideoConvertor)\]").unwrap()
    })
}

/// Parse one output line into a progress update, if it carries one.
///
/// Download lines report percent, total size and speed; transcoder lines
/// switch the stage to encoding.
pub fn parse_progress_line(line: &str) -> Option<Progress> {
    if let Some(captures) = download_pattern().captures(line) {
        let percent: f64 = captures.get(1)?.as_str().parse().ok()?;
        let total_size: f64 = captures.get(2)?.as_str().parse().ok()?;
        let total = convert_to_bytes(total_size, captures.get(3)?.as_str());
        let downloaded = (total as f64 * percent / 100.0) as i64;

        let speed = match (captures.get(4), captures.get(5)) {
            (Some(value), Some(unit)) => format!("{}{}/s", value.as_str(), unit.as_str()),
            _ => String::new(),
        };

        return Some(Progress {
            stage: ProgressStage::Downloading,
            percent,
            downloaded,
            total,
            speed,
        });
    }

    if encoding_pattern().is_match(line) {
        // Transfer is done; the transcoder gives no percentage.
        return Some(Progress {
            stage: ProgressStage::Encoding,
            percent: 100.0,
            downloaded: 0,
            total: 0,
            speed: String::new(),
        });
    }

    None
}

/// Convert a size with binary unit suffix to bytes
pub fn convert_to_bytes(size: f64, unit: &str) -> i64 {
    let multiplier: f64 = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    (size * multiplier) as i64
}
