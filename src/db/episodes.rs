//! Episode record operations.

use crate::error::{Error, Result};
use crate::model::Episode;

use super::Storage;

impl Storage {
    /// Fetch a single episode record
    pub async fn get_episode(&self, feed_id: &str, episode_id: &str) -> Result<Episode> {
        let mut tx = self.begin().await?;
        let episode = Self::kv_get(&mut tx, &Self::episode_key(feed_id, episode_id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::NotFound(format!("episode {feed_id}/{episode_id}"))
                }
                other => other,
            })?;
        tx.commit().await?;
        Ok(episode)
    }

    /// Read-modify-write a single episode in one transaction.
    ///
    /// The mutator receives the current record; changing the identity field
    /// is rejected and the transaction is rolled back.
    pub async fn update_episode(
        &self,
        feed_id: &str,
        episode_id: &str,
        mutator: impl FnOnce(&mut Episode) -> Result<()>,
    ) -> Result<()> {
        let key = Self::episode_key(feed_id, episode_id);
        let mut tx = self.begin().await?;

        let mut episode: Episode =
            Self::kv_get(&mut tx, &key).await.map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::NotFound(format!("episode {feed_id}/{episode_id}"))
                }
                other => other,
            })?;

        mutator(&mut episode)?;

        if episode.id != episode_id {
            return Err(Error::InvalidInput("episode ID must not change".into()));
        }

        Self::kv_put(&mut tx, &key, &episode).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete an episode record; deleting a missing record is a no-op
    pub async fn delete_episode(&self, feed_id: &str, episode_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        Self::kv_delete(&mut tx, &Self::episode_key(feed_id, episode_id)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Prefix scan over a feed's episodes, in stable key order.
    ///
    /// The callback returning an error aborts the scan and propagates.
    pub async fn walk_episodes(
        &self,
        feed_id: &str,
        mut cb: impl FnMut(Episode) -> Result<()>,
    ) -> Result<()> {
        let mut tx = self.begin().await?;
        let rows = Self::kv_scan(&mut tx, &Self::episode_prefix(feed_id), false).await?;
        tx.commit().await?;

        for (_, value) in rows {
            let episode: Episode = serde_json::from_str(&value)?;
            cb(episode)?;
        }

        Ok(())
    }
}
