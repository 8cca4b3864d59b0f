use tl_types::{CacheEntry, CachedMessage, Result, TeamLinkError};
use tracing::warn;

use crate::connection::{parse_ts, Database};

/// Repository for the per-channel preview cache.
///
/// Each row is replaced wholesale on write; there is no partial update.
pub struct ChannelCacheRepository<'a> {
    db: &'a Database,
}

impl<'a> ChannelCacheRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Replace the entry for `entry.channel_id` in a single statement.
    pub async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let messages = serde_json::to_string(&entry.messages)?;

        sqlx::query(
            "INSERT INTO channel_cache (channel_id, group_id, messages, last_updated)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET
                group_id = excluded.group_id,
                messages = excluded.messages,
                last_updated = excluded.last_updated",
        )
        .bind(&entry.channel_id)
        .bind(&entry.group_id)
        .bind(&messages)
        .bind(entry.last_updated.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Upsert channel cache: {e}")))?;

        Ok(())
    }

    /// Fetch entries for the given channels. Unknown channels are skipped.
    pub async fn get_many(&self, channel_ids: &[String]) -> Result<Vec<CacheEntry>> {
        if channel_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT channel_id, group_id, messages, last_updated
             FROM channel_cache WHERE channel_id IN ({})",
            vec!["?"; channel_ids.len()].join(", ")
        );
        let mut query = sqlx::query_as::<_, CacheRow>(&sql);
        for id in channel_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get channel cache: {e}")))?;

        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    pub async fn delete(&self, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channel_cache WHERE channel_id = ?")
            .bind(channel_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Delete channel cache: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    channel_id: String,
    group_id: String,
    messages: String,
    last_updated: String,
}

fn row_to_entry(row: CacheRow) -> CacheEntry {
    let messages: Vec<CachedMessage> = serde_json::from_str(&row.messages).unwrap_or_else(|e| {
        warn!(channel = %row.channel_id, error = %e, "Discarding unreadable cached messages");
        Vec::new()
    });

    CacheEntry {
        channel_id: row.channel_id,
        group_id: row.group_id,
        messages,
        last_updated: parse_ts(&row.last_updated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Database;
    use chrono::Utc;

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    fn message(ts: &str, text: &str) -> CachedMessage {
        CachedMessage {
            sender_id: "U1".to_string(),
            text: text.to_string(),
            ts: ts.to_string(),
            member: None,
            profile: None,
        }
    }

    fn entry(channel: &str, messages: Vec<CachedMessage>) -> CacheEntry {
        CacheEntry {
            channel_id: channel.to_string(),
            group_id: "g1".to_string(),
            messages,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_and_read() {
        let db = setup().await;
        let repo = ChannelCacheRepository::new(&db);

        repo.upsert(&entry("C1", vec![message("2", "b"), message("1", "a")]))
            .await
            .unwrap();

        let found = repo.get_many(&["C1".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].messages.len(), 2);
        assert_eq!(found[0].messages[0].text, "b");
    }

    #[tokio::test]
    async fn upsert_replaces_whole_entry() {
        let db = setup().await;
        let repo = ChannelCacheRepository::new(&db);

        repo.upsert(&entry("C1", vec![message("1", "a"), message("0", "z")]))
            .await
            .unwrap();
        repo.upsert(&entry("C1", vec![message("3", "c")]))
            .await
            .unwrap();

        let found = repo.get_many(&["C1".to_string()]).await.unwrap();
        assert_eq!(found[0].messages, vec![message("3", "c")]);
    }

    #[tokio::test]
    async fn missing_channels_are_absent() {
        let db = setup().await;
        let repo = ChannelCacheRepository::new(&db);
        repo.upsert(&entry("C1", vec![])).await.unwrap();

        let found = repo
            .get_many(&["C1".to_string(), "C404".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(repo.get_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_entry() {
        let db = setup().await;
        let repo = ChannelCacheRepository::new(&db);
        repo.upsert(&entry("C1", vec![])).await.unwrap();

        assert!(repo.delete("C1").await.unwrap());
        assert!(!repo.delete("C1").await.unwrap());
    }
}
