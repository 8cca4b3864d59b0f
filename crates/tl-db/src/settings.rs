use chrono::Utc;
use tl_types::{Result, TeamLinkError};

use crate::connection::Database;

/// Settings key holding the Slack bot token.
pub const BOT_TOKEN_KEY: &str = "bot_token";

/// Repository for key/value settings.
pub struct SettingsRepository<'a> {
    db: &'a Database,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get setting: {e}")))?;

        Ok(row.map(|r| r.0).filter(|v| !v.trim().is_empty()))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Set setting: {e}")))?;

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Delete setting: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}
