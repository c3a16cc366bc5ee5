//! Feed record operations.

use crate::error::{Error, Result};
use crate::model::{Episode, Feed};

use super::Storage;

impl Storage {
    /// Upsert a feed record and append its episodes.
    ///
    /// The feed record itself is overwritten; episodes use insert-if-absent
    /// semantics so records mutated by earlier runs (status, size, error)
    /// are never clobbered by a refresh. All writes happen in one
    /// transaction.
    pub async fn add_feed(&self, feed_id: &str, feed: &Feed) -> Result<()> {
        let mut tx = self.begin().await?;

        // Episodes live under their own keys; strip them from the record.
        let mut record = feed.clone();
        record.episodes = Vec::new();
        Self::kv_put(&mut tx, &Self::feed_key(feed_id), &record).await?;

        for episode in &feed.episodes {
            let key = Self::episode_key(feed_id, &episode.id);
            match Self::kv_insert(&mut tx, &key, episode).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a feed record together with its complete episode list.
    ///
    /// Fails with [`Error::NotFound`] when the feed does not exist.
    pub async fn get_feed(&self, feed_id: &str) -> Result<Feed> {
        let mut tx = self.begin().await?;

        let mut feed: Feed = Self::kv_get(&mut tx, &Self::feed_key(feed_id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("feed {feed_id:?}")),
                other => other,
            })?;
        feed.id = feed_id.to_string();

        let rows = Self::kv_scan(&mut tx, &Self::episode_prefix(feed_id), false).await?;
        feed.episodes = rows
            .into_iter()
            .map(|(_, value)| serde_json::from_str::<Episode>(&value).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?;

        tx.commit().await?;
        Ok(feed)
    }

    /// Prefix scan over every stored feed.
    ///
    /// The callback returning an error aborts the scan and propagates.
    pub async fn walk_feeds(&self, mut cb: impl FnMut(Feed) -> Result<()>) -> Result<()> {
        let mut tx = self.begin().await?;
        let prefix = Self::feed_prefix();
        let rows = Self::kv_scan(&mut tx, &prefix, false).await?;
        tx.commit().await?;

        for (key, value) in rows {
            let mut feed: Feed = serde_json::from_str(&value)?;
            // The feed ID is the key suffix past the namespace prefix.
            if key.len() > prefix.len() {
                feed.id = key[prefix.len()..].to_string();
            }
            cb(feed)?;
        }

        Ok(())
    }

    /// Delete a feed record and every one of its episodes in one transaction.
    ///
    /// History entries are intentionally retained so past job runs stay
    /// visible after the feed is gone.
    pub async fn delete_feed(&self, feed_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::kv_delete(&mut tx, &Self::feed_key(feed_id)).await?;
        Self::kv_delete_prefix(&mut tx, &Self::episode_prefix(feed_id)).await?;
        tx.commit().await?;
        Ok(())
    }
}
