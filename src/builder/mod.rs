//! Provider listing adapters.
//!
//! The update pipeline depends only on the [`ListingSource`] capability:
//! fetch the current remote episode set for a feed. The production
//! implementation is a tagged set of adapters keyed by [`Provider`], all
//! currently backed by the media downloader's flat-playlist JSON dump.
//! Provider API clients can replace individual arms without touching the
//! pipeline.

use crate::config::{FeedConfig, TokenList};
use crate::error::{Error, Result};
use crate::model::{Feed, Provider};
use crate::ytdl::Downloader;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Capability the update pipeline needs from the listing side
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch the remote episode list for a feed, bounded by its page size
    async fn build(&self, config: &FeedConfig) -> Result<Feed>;
}

/// Ordered API keys for one provider.
///
/// Keys rotate on quota errors so a burst against one key does not stall
/// the feed until the quota window resets.
pub struct KeyProvider {
    keys: Vec<String>,
    current: AtomicUsize,
}

impl KeyProvider {
    /// Build a provider from the configured token list
    pub fn new(tokens: &TokenList) -> Self {
        Self {
            keys: tokens.keys(),
            current: AtomicUsize::new(0),
        }
    }

    /// The key to use for the next request, if any are configured
    pub fn get(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.current.load(Ordering::Relaxed) % self.keys.len();
        Some(self.keys[index].clone())
    }

    /// Advance to the next key after a quota error
    pub fn rotate(&self) {
        if self.keys.len() > 1 {
            self.current.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Listing adapters keyed by provider tag
pub struct ProviderRegistry {
    downloader: Arc<dyn Downloader>,
    keys: HashMap<Provider, Arc<KeyProvider>>,
}

impl ProviderRegistry {
    /// Build the registry from the configured tokens
    pub fn new(
        downloader: Arc<dyn Downloader>,
        tokens: &HashMap<Provider, TokenList>,
    ) -> Self {
        let keys = tokens
            .iter()
            .map(|(provider, list)| (*provider, Arc::new(KeyProvider::new(list))))
            .collect();
        Self { downloader, keys }
    }

    /// API keys configured for a provider
    pub fn keys_for(&self, provider: Provider) -> Option<Arc<KeyProvider>> {
        self.keys.get(&provider).cloned()
    }

    /// Shared listing implementation over the downloader's JSON dumps
    async fn build_via_downloader(
        &self,
        provider: Provider,
        config: &FeedConfig,
    ) -> Result<Feed> {
        let metadata = self.downloader.playlist_metadata(&config.url).await;
        let metadata = match metadata {
            Ok(metadata) => metadata,
            Err(Error::TooManyRequests) => {
                // Quota errors rotate to the next configured key before the
                // error propagates, so the next run tries a fresh key.
                if let Some(keys) = self.keys_for(provider) {
                    keys.rotate();
                }
                return Err(Error::TooManyRequests);
            }
            Err(e) => return Err(e),
        };

        let episodes = self
            .downloader
            .playlist_entries(&config.url, config.page_size, config.playlist_sort)
            .await?;

        let cover_art = metadata
            .thumbnails
            .last()
            .map(|t| t.url.clone())
            .unwrap_or_default();

        let title = if metadata.title.is_empty() {
            metadata.channel.clone()
        } else {
            metadata.title.clone()
        };

        Ok(Feed {
            id: config.id.clone(),
            provider: Some(provider),
            title,
            description: metadata.description,
            author: metadata.channel,
            cover_art,
            item_url: if metadata.webpage_url.is_empty() {
                config.url.clone()
            } else {
                metadata.webpage_url
            },
            updated_at: Some(Utc::now()),
            episodes,
        })
    }
}

#[async_trait]
impl ListingSource for ProviderRegistry {
    async fn build(&self, config: &FeedConfig) -> Result<Feed> {
        let provider = config.resolve_provider().ok_or_else(|| Error::Config {
            message: format!("cannot resolve provider for {:?}", config.url),
            key: Some(format!("feeds.{}.url", config.id)),
        })?;

        match provider {
            Provider::Youtube
            | Provider::Vimeo
            | Provider::Soundcloud
            | Provider::Twitch => self.build_via_downloader(provider, config).await,
        }
    }
}
