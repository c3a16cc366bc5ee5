//! Core domain types for podsync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Default number of episodes fetched (and downloaded) per feed update
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default update interval for feeds without an explicit schedule (seconds)
pub const DEFAULT_UPDATE_PERIOD_SECS: u64 = 6 * 60 * 60;

/// Media provider a feed is sourced from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// YouTube channels and playlists
    Youtube,
    /// Vimeo channels, groups and users
    Vimeo,
    /// SoundCloud playlists
    Soundcloud,
    /// Twitch channels and VODs
    Twitch,
}

impl Provider {
    /// Resolve a provider from a channel URL
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.contains("youtube.com") || lower.contains("youtu.be") {
            Some(Provider::Youtube)
        } else if lower.contains("vimeo.com") {
            Some(Provider::Vimeo)
        } else if lower.contains("soundcloud.com") {
            Some(Provider::Soundcloud)
        } else if lower.contains("twitch.tv") {
            Some(Provider::Twitch)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Provider::Youtube => "youtube",
            Provider::Vimeo => "vimeo",
            Provider::Soundcloud => "soundcloud",
            Provider::Twitch => "twitch",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" => Ok(Provider::Youtube),
            "vimeo" => Ok(Provider::Vimeo),
            "soundcloud" => Ok(Provider::Soundcloud),
            "twitch" => Ok(Provider::Twitch),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Output format for downloaded media
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// MP4 video (default)
    #[default]
    Video,
    /// MP3 audio
    Audio,
    /// Custom format selector with an explicit extension
    Custom,
}

/// Download quality selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Best available quality (default)
    #[default]
    High,
    /// Worst available quality, for constrained storage
    Low,
}

/// Playlist iteration order when fetching the upstream listing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistSort {
    /// Oldest first (default)
    #[default]
    Asc,
    /// Newest first
    Desc,
}

/// Episode download status
///
/// Statuses form a closed state machine; transitions outside
/// [`EpisodeStatus::can_transition`] are rejected by the update pipeline.
/// `blocked` and `cleaned` are sticky: reconciliation with the upstream
/// listing never changes them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    /// Discovered in the listing, not yet processed
    #[default]
    New,
    /// Selected for download in the current run
    Queued,
    /// Download subprocess in flight
    Downloading,
    /// Artifact committed to the artifact store
    Downloaded,
    /// Download failed; error message recorded on the episode
    Error,
    /// Artifact removed by the cleanup policy, record retained
    Cleaned,
    /// Blocked by the user; never re-downloaded
    Blocked,
    /// Rejected by feed filters; never re-evaluated
    Ignored,
}

impl EpisodeStatus {
    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// Re-writing the same status is always allowed (idempotent re-entry),
    /// and any status may be blocked. `cleaned`, `ignored` and `blocked` are
    /// otherwise terminal; an explicit retry resets them outside this check.
    pub fn can_transition(self, to: EpisodeStatus) -> bool {
        use EpisodeStatus::*;

        if self == to || to == Blocked {
            return true;
        }

        match self {
            New => matches!(to, Queued | Downloading | Downloaded | Error | Ignored),
            Queued => matches!(to, Downloading | Downloaded | Error),
            Downloading => matches!(to, Queued | Downloaded | Error),
            Downloaded => matches!(to, Cleaned),
            Error => matches!(to, Queued | Downloading | Downloaded),
            Cleaned | Ignored | Blocked => false,
        }
    }

    /// Lowercase wire name, as used in episode detail records
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::New => "new",
            EpisodeStatus::Queued => "queued",
            EpisodeStatus::Downloading => "downloading",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Error => "error",
            EpisodeStatus::Cleaned => "cleaned",
            EpisodeStatus::Blocked => "blocked",
            EpisodeStatus::Ignored => "ignored",
        }
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single media item belonging to a feed
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Episode {
    /// Provider-assigned episode identifier, unique within the feed
    pub id: String,

    /// Episode title
    #[serde(default)]
    pub title: String,

    /// Episode description
    #[serde(default)]
    pub description: String,

    /// Thumbnail image URL
    #[serde(default)]
    pub thumbnail: String,

    /// Media duration in seconds
    #[serde(default)]
    pub duration: i64,

    /// Source media URL handed to the downloader
    #[serde(default)]
    pub video_url: String,

    /// Publication timestamp from the provider
    #[serde(default = "Utc::now")]
    pub pub_date: DateTime<Utc>,

    /// Size of the committed artifact in bytes (0 until downloaded)
    #[serde(default)]
    pub size: i64,

    /// Current download status
    #[serde(default)]
    pub status: EpisodeStatus,

    /// Error message from the most recent failed download
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Default for Episode {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            thumbnail: String::new(),
            duration: 0,
            video_url: String::new(),
            pub_date: Utc::now(),
            size: 0,
            status: EpisodeStatus::default(),
            error: String::new(),
        }
    }
}

/// A configured subscription mapping a remote channel to a hosted podcast
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Feed {
    /// Feed identifier, also the URL slug of the published document
    pub id: String,

    /// Provider the feed is sourced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,

    /// Channel title as reported by the provider
    #[serde(default)]
    pub title: String,

    /// Channel description
    #[serde(default)]
    pub description: String,

    /// Channel author / uploader name
    #[serde(default)]
    pub author: String,

    /// Cover art URL
    #[serde(default)]
    pub cover_art: String,

    /// Canonical channel page URL
    #[serde(default)]
    pub item_url: String,

    /// When the feed record was last refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Episodes belonging to this feed.
    ///
    /// Populated by `get_feed`; the stored feed record keeps this empty
    /// because episodes live under their own keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episodes: Vec<Episode>,
}

/// The kind of job a history entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// A full feed update pipeline run
    FeedUpdate,
    /// A manual single-episode retry
    EpisodeRetry,
    /// A manual episode deletion
    EpisodeDelete,
    /// A manual episode block
    EpisodeBlock,
}

/// Terminal (or in-flight) status of a recorded job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Entry inserted at job start; exactly one later update replaces it
    Running,
    /// All selected episodes processed without failure
    Success,
    /// The job failed outright, or every selected episode failed
    Failed,
    /// Some episodes succeeded, some failed
    Partial,
}

/// How a job was initiated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Fired by the cron scheduler
    Scheduled,
    /// User-initiated through the API
    Manual,
}

/// Per-episode outcome captured in a job's statistics at close-out
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct EpisodeDetail {
    /// Episode identifier
    pub id: String,
    /// Episode title at the time the job ended
    #[serde(default)]
    pub title: String,
    /// Episode status at the time the job ended
    #[serde(default)]
    pub status: String,
    /// Error message, when the episode failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Artifact size in bytes
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: i64,
    /// Media duration in seconds
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Counters describing what a job did
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct JobStatistics {
    /// Episodes selected for download
    #[serde(default)]
    pub episodes_queued: usize,
    /// Episodes that reached `downloaded` during the job
    #[serde(default)]
    pub episodes_downloaded: usize,
    /// Episodes that reached `error` during the job
    #[serde(default)]
    pub episodes_failed: usize,
    /// Episodes marked `ignored` by filters during the job
    #[serde(default)]
    pub episodes_ignored: usize,
    /// Total artifact bytes committed during the job
    #[serde(default)]
    pub bytes_downloaded: i64,
    /// Per-episode outcomes, captured once at job end
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episode_details: Vec<EpisodeDetail>,
}

/// A single entry in the job history.
///
/// IDs have the form `<unix_seconds>-<uuid>` so lexicographic key order
/// equals chronological order.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// Entry identifier (`<unix_seconds>-<uuid>`)
    pub id: String,
    /// Kind of job this entry records
    pub job_type: JobType,
    /// Feed the job ran against
    pub feed_id: String,
    /// Feed title snapshot taken at job start
    #[serde(default)]
    pub feed_title: String,
    /// Episode identifier, for episode-scoped jobs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub episode_id: String,
    /// Episode title snapshot, for episode-scoped jobs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub episode_title: String,
    /// When the job started
    pub start_time: DateTime<Utc>,
    /// When the job ended; absent while the job is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Job duration in milliseconds (`end_time - start_time`)
    #[serde(default)]
    pub duration_ms: i64,
    /// Job status
    pub status: JobStatus,
    /// How the job was initiated
    pub trigger_type: TriggerType,
    /// Counters and per-episode outcomes
    #[serde(default)]
    pub statistics: JobStatistics,
    /// Error message when the job failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Query filters for listing history entries
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct HistoryFilters {
    /// Only entries for this feed
    #[serde(default)]
    pub feed_id: Option<String>,
    /// Only entries of this job type
    #[serde(default)]
    pub job_type: Option<JobType>,
    /// Only entries with this status
    #[serde(default)]
    pub status: Option<JobStatus>,
    /// Only entries starting at or after this instant
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Only entries starting at or before this instant
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Case-insensitive substring match against feed and episode titles
    #[serde(default)]
    pub search: Option<String>,
}

impl HistoryFilters {
    /// Whether `entry` passes every set filter except the feed filter.
    ///
    /// The feed filter is applied through the storage index scan, so it is
    /// intentionally not re-checked here.
    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(job_type) = self.job_type {
            if entry.job_type != job_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if entry.start_time < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.start_time > end {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_feed = entry.feed_title.to_lowercase().contains(&needle);
            let in_episode = entry.episode_title.to_lowercase().contains(&needle);
            if !in_feed && !in_episode {
                return false;
            }
        }
        true
    }
}
