//! Configuration types for podsync

use crate::error::{Error, Result};
use crate::model::{
    Format, PlaylistSort, Provider, Quality, DEFAULT_PAGE_SIZE, DEFAULT_UPDATE_PERIOD_SECS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use utoipa::ToSchema;

/// Web server configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ServerConfig {
    /// Public URL prefix used for links in generated feed documents
    /// (e.g., "https://podsync.example.com")
    #[serde(default)]
    pub hostname: String,

    /// Port to listen on (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind to (default: "0.0.0.0")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Base path prefix for all published documents (default: none)
    #[serde(default)]
    pub path: String,

    /// Serve the API and documents over TLS
    #[serde(default)]
    pub tls: bool,

    /// PEM certificate path, required when `tls` is set
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub certificate_path: Option<PathBuf>,

    /// PEM private key path, required when `tls` is set
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub key_file_path: Option<PathBuf>,

    /// Whether the bundled web UI is enabled
    #[serde(default = "default_true")]
    pub web_ui_enabled: bool,

    /// HTTP basic authentication for the management API
    #[serde(default)]
    pub basic_auth: BasicAuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: default_port(),
            bind_address: default_bind_address(),
            path: String::new(),
            tls: false,
            certificate_path: None,
            key_file_path: None,
            web_ui_enabled: true,
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

/// HTTP basic authentication settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct BasicAuthConfig {
    /// Require basic auth on the management API
    #[serde(default)]
    pub enabled: bool,

    /// Expected username
    #[serde(default)]
    pub username: String,

    /// Expected password
    #[serde(default)]
    pub password: String,
}

/// Artifact storage backend selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Local filesystem, also served over HTTP
    #[default]
    Local,
    /// S3-compatible remote object store (externally hosted)
    #[serde(alias = "remote_object")]
    S3,
}

/// Local filesystem storage settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct LocalStorageConfig {
    /// Root directory for artifacts and published documents
    #[serde(default)]
    #[schema(value_type = String)]
    pub data_dir: PathBuf,
}

/// S3-compatible storage settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct S3StorageConfig {
    /// Endpoint URL (e.g., "https://s3.us-west-2.amazonaws.com")
    #[serde(default)]
    pub endpoint_url: String,

    /// Region name used for request signing
    #[serde(default)]
    pub region: String,

    /// Bucket name
    #[serde(default)]
    pub bucket: String,

    /// Optional key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,

    /// Access key ID; falls back to standard AWS environment variables
    #[serde(default)]
    pub access_key: String,

    /// Secret access key
    #[serde(default)]
    pub secret_key: String,
}

/// Artifact storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// Backend type
    #[serde(rename = "type", default)]
    pub storage_type: StorageType,

    /// Local backend settings
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// S3 backend settings
    #[serde(default)]
    pub s3: S3StorageConfig,
}

/// Durable store configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DatabaseConfig {
    /// Directory holding the database file
    #[serde(default)]
    #[schema(value_type = String)]
    pub dir: PathBuf,
}

/// Release channel for media downloader self-updates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    /// Stable releases (default)
    #[default]
    Stable,
    /// Nightly builds
    Nightly,
    /// Master branch builds
    Master,
}

impl UpdateChannel {
    /// Channel name as passed to the downloader's update subcommand
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateChannel::Stable => "stable",
            UpdateChannel::Nightly => "nightly",
            UpdateChannel::Master => "master",
        }
    }
}

/// Media downloader (yt-dlp) configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloaderConfig {
    /// Self-update the downloader binary at startup and every 24 hours
    #[serde(default)]
    pub self_update: bool,

    /// Release channel for self-updates
    #[serde(default)]
    pub update_channel: UpdateChannel,

    /// Pin self-updates to a specific version (`<channel>@<tag>` or `<tag>`)
    #[serde(default)]
    pub update_version: String,

    /// Per-download timeout in minutes (default: 10)
    #[serde(default = "default_download_timeout", rename = "timeout")]
    pub timeout_minutes: u64,

    /// Custom downloader binary path; disables self-updates
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub custom_binary: Option<PathBuf>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            self_update: false,
            update_channel: UpdateChannel::default(),
            update_version: String::new(),
            timeout_minutes: default_download_timeout(),
            custom_binary: None,
        }
    }
}

/// Job history retention configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryConfig {
    /// Record job history (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Days to retain entries for (default: 30)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum number of entries to keep (default: 1000)
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            max_entries: default_max_entries(),
        }
    }
}

/// Episode cleanup policy
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CleanupConfig {
    /// Keep this many newest downloaded episodes; 0 keeps everything
    #[serde(default)]
    pub keep_last: usize,
}

/// Episode selection predicates; empty patterns accept everything
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct FeedFilters {
    /// Title must match this regex
    #[serde(default)]
    pub title: String,

    /// Title must not match this regex
    #[serde(default)]
    pub not_title: String,

    /// Description must match this regex
    #[serde(default)]
    pub description: String,

    /// Description must not match this regex
    #[serde(default)]
    pub not_description: String,

    /// Minimum media duration in seconds (0 = ignored)
    #[serde(default)]
    pub min_duration: i64,

    /// Maximum media duration in seconds (0 = ignored)
    #[serde(default)]
    pub max_duration: i64,

    /// Minimum age in days relative to the published timestamp (0 = ignored)
    #[serde(default)]
    pub min_age: i64,

    /// Maximum age in days relative to the published timestamp (0 = ignored)
    #[serde(default)]
    pub max_age: i64,
}

/// Custom download format selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CustomFormat {
    /// File extension of the produced artifact (e.g., "opus")
    #[serde(default)]
    pub extension: String,

    /// Raw format selector handed to the downloader
    #[serde(default)]
    pub youtube_dl_format: String,
}

/// Feed-level metadata overrides for the published document
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CustomMetadata {
    /// Override the channel title
    #[serde(default)]
    pub title: String,

    /// Override the channel description
    #[serde(default)]
    pub description: String,

    /// Override the author name
    #[serde(default)]
    pub author: String,

    /// Override the cover art URL
    #[serde(default)]
    pub cover_art: String,

    /// Quality used when selecting provider cover art
    #[serde(default)]
    pub cover_art_quality: Quality,

    /// iTunes category
    #[serde(default)]
    pub category: String,

    /// iTunes subcategories
    #[serde(default)]
    pub subcategories: Vec<String>,

    /// Feed language code (e.g., "en")
    #[serde(default)]
    pub language: String,

    /// Explicit content flag
    #[serde(default)]
    pub explicit: bool,

    /// iTunes owner name
    #[serde(default)]
    pub owner_name: String,

    /// iTunes owner email
    #[serde(default)]
    pub owner_email: String,

    /// Override the channel link
    #[serde(default)]
    pub link: String,
}

/// Per-feed configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedConfig {
    /// Feed identifier; filled in from the map key after load
    #[serde(default)]
    pub id: String,

    /// Remote channel URL
    pub url: String,

    /// Provider override; resolved from the URL when absent
    #[serde(default)]
    pub provider: Option<Provider>,

    /// Update interval in seconds (default: 6 hours).
    ///
    /// An interval implies a boot-time kick: the feed updates immediately on
    /// startup, then every interval. Setting `cron_schedule` defers the first
    /// run to the next tick instead.
    #[serde(default = "default_update_period", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub update_period: Duration,

    /// Explicit cron expression (5-field); takes precedence over the interval
    #[serde(default)]
    pub cron_schedule: String,

    /// Episodes fetched (and downloaded) per update (default: 50)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Download quality
    #[serde(default)]
    pub quality: Quality,

    /// Output format
    #[serde(default)]
    pub format: Format,

    /// Custom format settings, used when `format` is `custom`
    #[serde(default)]
    pub custom_format: CustomFormat,

    /// Maximum video height in pixels (0 = unlimited)
    #[serde(default)]
    pub max_height: u32,

    /// Playlist iteration order
    #[serde(default)]
    pub playlist_sort: PlaylistSort,

    /// Episode selection predicates
    #[serde(default)]
    pub filters: FeedFilters,

    /// Cleanup policy; falls back to the global policy when absent
    #[serde(default)]
    pub clean: Option<CleanupConfig>,

    /// Metadata overrides for the published document
    #[serde(default)]
    pub custom: CustomMetadata,

    /// Include this feed in the combined OPML document
    #[serde(default)]
    pub opml: bool,

    /// Extra arguments appended to every downloader invocation
    #[serde(default)]
    pub youtube_dl_args: Vec<String>,

    /// Shell commands run after each successful episode download
    #[serde(default)]
    pub post_episode_download: Vec<String>,
}

impl FeedConfig {
    /// File extension of artifacts produced for this feed
    pub fn extension(&self) -> &str {
        match self.format {
            Format::Video => "mp4",
            Format::Audio => "mp3",
            Format::Custom => {
                if self.custom_format.extension.is_empty() {
                    "mp4"
                } else {
                    &self.custom_format.extension
                }
            }
        }
    }

    /// Resolve the provider, preferring the explicit override
    pub fn resolve_provider(&self) -> Option<Provider> {
        self.provider.or_else(|| Provider::from_url(&self.url))
    }
}

/// API keys for a provider; accepts a single string or a list in TOML.
///
/// Multiple keys enable rotation when a provider starts returning quota
/// errors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TokenList {
    /// No keys configured
    #[default]
    #[serde(skip)]
    Empty,
    /// A single key
    One(String),
    /// An ordered list of keys
    Many(Vec<String>),
}

impl TokenList {
    /// All keys in rotation order
    pub fn keys(&self) -> Vec<String> {
        match self {
            TokenList::Empty => Vec::new(),
            TokenList::One(key) => vec![key.clone()],
            TokenList::Many(keys) => keys.clone(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Web server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Durable store settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Media downloader settings
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// Provider API keys
    #[serde(default)]
    #[schema(value_type = Object)]
    pub tokens: HashMap<Provider, TokenList>,

    /// Global cleanup policy for feeds without their own
    #[serde(default)]
    pub cleanup: Option<CleanupConfig>,

    /// Job history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Hosted feeds, keyed by feed ID
    #[serde(default)]
    pub feeds: BTreeMap<String, FeedConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the default configuration so the process can be
    /// bootstrapped entirely through the management API. Environment
    /// variable overrides are applied after the file, then the result is
    /// validated.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str::<Config>(&data).map_err(|e| Error::Config {
                message: format!("failed to parse {}: {e}", path.display()),
                key: None,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(Error::Io(e)),
        };

        for (id, feed) in config.feeds.iter_mut() {
            feed.id = id.clone();
        }

        config.apply_defaults(path);
        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    /// Fill in defaults that depend on the config file location
    fn apply_defaults(&mut self, config_path: &Path) {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));

        if self.server.hostname.is_empty() {
            self.server.hostname = if self.server.port == 80 {
                "http://localhost".to_string()
            } else {
                format!("http://localhost:{}", self.server.port)
            };
        }

        if self.storage.storage_type == StorageType::Local
            && self.storage.local.data_dir.as_os_str().is_empty()
        {
            self.storage.local.data_dir = base.join("data");
        }

        if self.database.dir.as_os_str().is_empty() {
            self.database.dir = base.join("db");
        }

        let global_cleanup = self.cleanup;
        for feed in self.feeds.values_mut() {
            if feed.clean.is_none() {
                feed.clean = global_cleanup;
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        let providers = [
            (Provider::Youtube, "PODSYNC_YOUTUBE_API_KEY"),
            (Provider::Vimeo, "PODSYNC_VIMEO_API_KEY"),
            (Provider::Soundcloud, "PODSYNC_SOUNDCLOUD_API_KEY"),
            (Provider::Twitch, "PODSYNC_TWITCH_API_KEY"),
        ];

        for (provider, var) in providers {
            if let Ok(value) = std::env::var(var) {
                tracing::info!(var, "replacing configured tokens from environment");
                // Space-separated keys enable rotation
                let keys: Vec<String> = value.split_whitespace().map(String::from).collect();
                self.tokens.insert(provider, TokenList::Many(keys));
            }
        }

        if let Ok(value) = std::env::var("PODSYNC_HISTORY_ENABLED") {
            self.history.enabled = value == "true" || value == "1";
        }
        if let Ok(value) = std::env::var("PODSYNC_HISTORY_RETENTION_DAYS") {
            if let Ok(days) = value.parse() {
                self.history.retention_days = days;
            }
        }
        if let Ok(value) = std::env::var("PODSYNC_HISTORY_MAX_ENTRIES") {
            if let Ok(entries) = value.parse() {
                self.history.max_entries = entries;
            }
        }
        if let Ok(value) = std::env::var("PODSYNC_WEB_UI") {
            self.server.web_ui_enabled = value == "true" || value == "1";
        }
    }

    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        match self.storage.storage_type {
            StorageType::Local => {
                if self.storage.local.data_dir.as_os_str().is_empty() {
                    problems.push("storage.local.data_dir is required for local storage".into());
                }
            }
            StorageType::S3 => {
                let s3 = &self.storage.s3;
                if s3.endpoint_url.is_empty() || s3.region.is_empty() || s3.bucket.is_empty() {
                    problems
                        .push("s3 storage requires endpoint_url, region and bucket".to_string());
                }
            }
        }

        if self.server.tls
            && (self.server.certificate_path.is_none() || self.server.key_file_path.is_none())
        {
            problems.push("tls requires certificate_path and key_file_path".into());
        }

        if self.server.basic_auth.enabled && self.server.basic_auth.username.is_empty() {
            problems.push("basic_auth requires a username".into());
        }

        // Timeout is expressed in minutes everywhere; reject values that only
        // make sense as seconds.
        if self.downloader.timeout_minutes == 0 || self.downloader.timeout_minutes > 24 * 60 {
            problems.push(format!(
                "downloader.timeout must be 1..=1440 minutes, got {}",
                self.downloader.timeout_minutes
            ));
        }

        for (id, feed) in &self.feeds {
            if feed.url.is_empty() {
                problems.push(format!("feeds.{id}: url is required"));
            } else if feed.resolve_provider().is_none() {
                problems.push(format!(
                    "feeds.{id}: cannot resolve provider from {:?}; set provider explicitly",
                    feed.url
                ));
            }
            if !feed.cron_schedule.is_empty() {
                if let Err(e) = crate::scheduler::cron::CronSchedule::parse(&feed.cron_schedule) {
                    problems.push(format!("feeds.{id}: {e}"));
                }
            }
            let patterns = [
                ("title", &feed.filters.title),
                ("not_title", &feed.filters.not_title),
                ("description", &feed.filters.description),
                ("not_description", &feed.filters.not_description),
            ];
            for (name, pattern) in patterns {
                if !pattern.is_empty() {
                    if let Err(e) = regex::Regex::new(pattern) {
                        problems.push(format!("feeds.{id}: invalid {name} filter: {e}"));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config {
                message: problems.join("; "),
                key: None,
            })
        }
    }

    /// Write the configuration to `path` atomically, keeping a backup.
    ///
    /// The previous file is copied to `<path>.backup`, the new content is
    /// written to a temporary file next to it, and the temporary file is
    /// renamed over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: format!("failed to serialize configuration: {e}"),
            key: None,
        })?;

        if path.exists() {
            let backup = path.with_extension("toml.backup");
            std::fs::copy(path, &backup)?;
        }

        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;

        tracing::info!(path = %path.display(), "configuration written");
        Ok(())
    }

    /// Apply a partial JSON update to one named configuration section.
    ///
    /// Known sections: `server`, `storage`, `downloader`, `auth`
    /// (server.basic_auth), `tokens`, `history`. The patch is merged over
    /// the section's current value, so omitted fields are preserved.
    pub fn merge_section(&mut self, section: &str, patch: serde_json::Value) -> Result<()> {
        fn merge_into<T>(current: &T, patch: serde_json::Value) -> Result<T>
        where
            T: Serialize + serde::de::DeserializeOwned,
        {
            let mut value = serde_json::to_value(current)?;
            merge_json(&mut value, patch);
            Ok(serde_json::from_value(value)?)
        }

        match section {
            "server" => self.server = merge_into(&self.server, patch)?,
            "storage" => self.storage = merge_into(&self.storage, patch)?,
            "downloader" => self.downloader = merge_into(&self.downloader, patch)?,
            "auth" => self.server.basic_auth = merge_into(&self.server.basic_auth, patch)?,
            "tokens" => self.tokens = merge_into(&self.tokens, patch)?,
            "history" => self.history = merge_into(&self.history, patch)?,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unknown configuration section: {other}"
                )))
            }
        }

        Ok(())
    }
}

/// Recursively merge `patch` into `target`; objects merge key-wise,
/// everything else is replaced.
fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn default_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_download_timeout() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_entries() -> u32 {
    1000
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_update_period() -> Duration {
    Duration::from_secs(DEFAULT_UPDATE_PERIOD_SECS)
}

/// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
