use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tl_db::{ChannelCacheRepository, Database};
use tl_types::{CacheEntry, CachedMessage, MAX_CACHED_MESSAGES};
use tracing::{debug, warn};

/// Persisted channel previews. Store failures are logged, never returned.
pub struct CacheStore {
    db: Arc<Database>,
    max_messages: usize,
    stale_after: chrono::Duration,
}

impl CacheStore {
    pub fn new(db: Arc<Database>, max_messages: usize, stale_after: Duration) -> Self {
        Self {
            db,
            max_messages: max_messages.clamp(1, MAX_CACHED_MESSAGES),
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::seconds(tl_types::STALE_AFTER_SECS)),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Entries for the given channels. Channels without an entry are absent.
    pub async fn read_many(&self, channel_ids: &[String]) -> HashMap<String, CacheEntry> {
        match ChannelCacheRepository::new(&self.db).get_many(channel_ids).await {
            Ok(entries) => entries
                .into_iter()
                .map(|e| (e.channel_id.clone(), e))
                .collect(),
            Err(e) => {
                warn!(error = %e, channels = channel_ids.len(), "Channel cache read failed");
                HashMap::new()
            }
        }
    }

    pub async fn read(&self, channel_id: &str) -> Option<CacheEntry> {
        self.read_many(&[channel_id.to_string()])
            .await
            .remove(channel_id)
    }

    /// Replace a channel's entry with the newest `max_messages` messages.
    ///
    /// Returns the entry as written. Write failures are logged only.
    pub async fn upsert(
        &self,
        channel_id: &str,
        group_id: &str,
        mut messages: Vec<CachedMessage>,
    ) -> CacheEntry {
        messages.truncate(self.max_messages);
        let entry = CacheEntry {
            channel_id: channel_id.to_string(),
            group_id: group_id.to_string(),
            messages,
            last_updated: Utc::now(),
        };

        match ChannelCacheRepository::new(&self.db).upsert(&entry).await {
            Ok(()) => debug!(channel = %channel_id, count = entry.messages.len(), "Channel cache updated"),
            Err(e) => warn!(channel = %channel_id, error = %e, "Channel cache write failed"),
        }
        entry
    }

    pub async fn remove(&self, channel_id: &str) {
        if let Err(e) = ChannelCacheRepository::new(&self.db).delete(channel_id).await {
            warn!(channel = %channel_id, error = %e, "Channel cache delete failed");
        }
    }

    pub fn age(&self, entry: &CacheEntry) -> chrono::Duration {
        entry.age_at(Utc::now())
    }

    pub fn is_stale(&self, entry: &CacheEntry) -> bool {
        self.is_stale_at(entry, Utc::now())
    }

    pub fn is_stale_at(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry.is_stale_at(now, self.stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> CacheStore {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.initialize().await.unwrap();
        CacheStore::new(db, MAX_CACHED_MESSAGES, Duration::from_secs(300))
    }

    fn msg(ts: &str) -> CachedMessage {
        CachedMessage {
            sender_id: "U1".to_string(),
            text: format!("message {ts}"),
            ts: ts.to_string(),
            member: None,
            profile: None,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_newest_five() {
        let store = store().await;
        let messages: Vec<_> = (0..8).rev().map(|i| msg(&i.to_string())).collect();

        let written = store.upsert("C1", "g1", messages).await;
        assert_eq!(written.messages.len(), 5);

        let entry = store.read("C1").await.unwrap();
        let ts: Vec<_> = entry.messages.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(ts, vec!["7", "6", "5", "4", "3"]);
        assert_eq!(entry.group_id, "g1");
    }

    #[tokio::test]
    async fn read_many_skips_missing() {
        let store = store().await;
        store.upsert("C1", "g1", vec![msg("1")]).await;
        store.upsert("C2", "g2", vec![]).await;

        let entries = store
            .read_many(&["C1".to_string(), "C2".to_string(), "C3".to_string()])
            .await;
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("C2"));
        assert!(!entries.contains_key("C3"));
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = store().await;
        store.upsert("C1", "g1", vec![msg("1"), msg("0")]).await;
        store.upsert("C1", "g1", vec![msg("2")]).await;

        let entry = store.read("C1").await.unwrap();
        assert_eq!(entry.messages, vec![msg("2")]);
    }

    #[tokio::test]
    async fn staleness_uses_configured_threshold() {
        let store = store().await;
        let entry = store.upsert("C1", "g1", vec![]).await;

        assert!(!store.is_stale(&entry));
        let now = entry.last_updated + chrono::Duration::seconds(300);
        assert!(!store.is_stale_at(&entry, now));
        let now = entry.last_updated + chrono::Duration::seconds(301);
        assert!(store.is_stale_at(&entry, now));
        assert!(store.age(&entry) < chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn broken_store_degrades() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        // Schema never created: every query fails.
        let store = CacheStore::new(db, 5, Duration::from_secs(300));

        let written = store.upsert("C1", "g1", vec![msg("1")]).await;
        assert_eq!(written.messages.len(), 1);
        assert!(store.read_many(&["C1".to_string()]).await.is_empty());
        store.remove("C1").await;
    }
}
