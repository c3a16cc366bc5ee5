//! History entry operations, the per-feed index, and retention cleanup.

use chrono::{Duration, Utc};

use crate::error::{Error, Result};
use crate::model::{HistoryEntry, HistoryFilters};

use super::Storage;

impl Storage {
    /// Insert (or overwrite) a history entry, maintaining the feed index
    pub async fn add_history(&self, entry: &HistoryEntry) -> Result<()> {
        let mut tx = self.begin().await?;

        Self::kv_put(&mut tx, &Self::history_key(&entry.id), entry).await?;

        // Index by feed so feed-scoped listings don't scan unrelated entries.
        if !entry.feed_id.is_empty() {
            let index_key = Self::history_feed_key(&entry.feed_id, &entry.id);
            Self::kv_put(&mut tx, &index_key, &entry.id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a single history entry
    pub async fn get_history(&self, id: &str) -> Result<HistoryEntry> {
        let mut tx = self.begin().await?;
        let entry = Self::kv_get(&mut tx, &Self::history_key(id))
            .await
            .map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("history entry {id:?}")),
                other => other,
            })?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Read-modify-write a history entry in one transaction.
    ///
    /// Changing the identity field is rejected.
    pub async fn update_history(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut HistoryEntry) -> Result<()>,
    ) -> Result<()> {
        let key = Self::history_key(id);
        let mut tx = self.begin().await?;

        let mut entry: HistoryEntry =
            Self::kv_get(&mut tx, &key).await.map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(format!("history entry {id:?}")),
                other => other,
            })?;

        mutator(&mut entry)?;

        if entry.id != id {
            return Err(Error::InvalidInput("history entry ID must not change".into()));
        }

        Self::kv_put(&mut tx, &key, &entry).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a history entry and its feed index record.
    ///
    /// Deleting a missing entry is a no-op.
    pub async fn delete_history(&self, id: &str) -> Result<()> {
        let mut tx = self.begin().await?;

        let key = Self::history_key(id);
        let entry: HistoryEntry = match Self::kv_get(&mut tx, &key).await {
            Ok(entry) => entry,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        Self::kv_delete(&mut tx, &key).await?;
        if !entry.feed_id.is_empty() {
            let index_key = Self::history_feed_key(&entry.feed_id, id);
            Self::kv_delete(&mut tx, &index_key).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// List history entries newest-first with pagination.
    ///
    /// `page` is 1-based. When a feed filter is set, the feed index is
    /// scanned and dereferenced; all other filters are applied in-memory
    /// during the scan. Returns the page plus the total count of matching
    /// entries.
    pub async fn list_history(
        &self,
        filters: &HistoryFilters,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<HistoryEntry>, usize)> {
        let mut tx = self.begin().await?;

        let candidates: Vec<HistoryEntry> = match &filters.feed_id {
            Some(feed_id) if !feed_id.is_empty() => {
                let rows =
                    Self::kv_scan(&mut tx, &Self::history_feed_prefix(feed_id), true).await?;
                let mut entries = Vec::with_capacity(rows.len());
                for (index_key, value) in rows {
                    let history_id: String = serde_json::from_str(&value)?;
                    match Self::kv_get(&mut tx, &Self::history_key(&history_id)).await {
                        Ok(entry) => entries.push(entry),
                        Err(Error::NotFound(_)) => {
                            tracing::warn!(index_key, "dangling history index entry");
                        }
                        Err(e) => return Err(e),
                    }
                }
                entries
            }
            _ => {
                let rows = Self::kv_scan(&mut tx, &Self::history_prefix(), true).await?;
                rows.into_iter()
                    .map(|(_, value)| serde_json::from_str(&value).map_err(Error::from))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        tx.commit().await?;

        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let mut total = 0usize;
        let mut entries = Vec::new();

        for entry in candidates {
            if !filters.matches(&entry) {
                continue;
            }
            total += 1;
            if total > skip && entries.len() < page_size {
                entries.push(entry);
            }
        }

        Ok((entries, total))
    }

    /// Delete entries per the retention policy; returns how many were removed.
    ///
    /// An entry is removed when it is older than `retention_days`, or when
    /// its recency rank exceeds `max_entries`. A zero disables the
    /// corresponding rule, except that `(0, 0)` deletes everything.
    pub async fn cleanup_history(
        &self,
        retention_days: u32,
        max_entries: u32,
    ) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));

        let mut tx = self.begin().await?;
        let rows = Self::kv_scan(&mut tx, &Self::history_prefix(), true).await?;
        tx.commit().await?;

        let mut to_delete = Vec::new();
        let mut seen = 0usize;

        for (_, value) in rows {
            let entry: HistoryEntry = serde_json::from_str(&value)?;
            seen += 1;

            if retention_days == 0 && max_entries == 0 {
                to_delete.push(entry);
            } else if retention_days > 0 && entry.start_time < cutoff {
                to_delete.push(entry);
            } else if max_entries > 0 && seen > max_entries as usize {
                to_delete.push(entry);
            }
        }

        let deleted = to_delete.len();
        if deleted > 0 {
            let mut tx = self.begin().await?;
            for entry in &to_delete {
                Self::kv_delete(&mut tx, &Self::history_key(&entry.id)).await?;
                if !entry.feed_id.is_empty() {
                    let index_key = Self::history_feed_key(&entry.feed_id, &entry.id);
                    Self::kv_delete(&mut tx, &index_key).await?;
                }
            }
            tx.commit().await?;
        }

        tracing::debug!(deleted, retention_days, max_entries, "history cleanup done");
        Ok(deleted)
    }

    /// Count all history entries and find the oldest one
    pub async fn history_stats(&self) -> Result<(usize, Option<HistoryEntry>)> {
        let mut tx = self.begin().await?;
        let rows = Self::kv_scan(&mut tx, &Self::history_prefix(), false).await?;
        tx.commit().await?;

        let mut count = 0usize;
        let mut oldest: Option<HistoryEntry> = None;

        for (_, value) in rows {
            let entry: HistoryEntry = serde_json::from_str(&value)?;
            count += 1;
            match &oldest {
                Some(current) if current.start_time <= entry.start_time => {}
                _ => oldest = Some(entry),
            }
        }

        Ok((count, oldest))
    }
}
