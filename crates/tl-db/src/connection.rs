use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use tl_types::{Result, TeamLinkError};

/// Async SQLite database connection manager.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from file path.
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| TeamLinkError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a new in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| TeamLinkError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Initialize all database tables and indexes.
    pub async fn initialize(&self) -> Result<()> {
        // Groups table; channel_id is the 1:1 link to the chat channel
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                channel_id TEXT UNIQUE,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create groups table: {e}")))?;

        // Members table with optional external identity
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                email TEXT,
                avatar_url TEXT,
                is_admin INTEGER DEFAULT 0,
                external_user_id TEXT,
                external_access_token TEXT,
                linked_at TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create members table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_members_external
             ON members(external_user_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create members index: {e}")))?;

        // Group membership
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
                member_id TEXT NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                PRIMARY KEY (group_id, member_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create group_members table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_group_members_member
             ON group_members(member_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create group_members index: {e}")))?;

        // Channel preview cache
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channel_cache (
                channel_id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                messages TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create channel_cache table: {e}")))?;

        // Key/value settings (bot credential lives here)
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create settings table: {e}")))?;

        // Append-only audit log
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                kind TEXT NOT NULL,
                channel_id TEXT,
                group_id TEXT,
                detail TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create sync_activity table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sync_activity_group
             ON sync_activity(group_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create sync_activity index: {e}")))?;

        // Invitations, one per member
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS invitations (
                member_id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                requested_at TEXT NOT NULL,
                completed_at TEXT,
                completed_by TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| TeamLinkError::Database(format!("Create invitations table: {e}")))?;

        info!("Database schema initialized (7 tables, 3 indexes)");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

/// Parse an RFC 3339 column, falling back to the epoch for corrupt rows.
pub(crate) fn parse_ts(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn database_initialize() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();

        for table in [
            "groups",
            "members",
            "group_members",
            "channel_cache",
            "settings",
            "sync_activity",
            "invitations",
        ] {
            let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(db.pool())
                .await
                .unwrap();
            assert_eq!(row.0, 0, "table {table} should start empty");
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.initialize().await.unwrap();
    }

    #[test]
    fn parse_ts_falls_back_to_epoch() {
        assert_eq!(parse_ts("garbage").timestamp(), 0);
        assert_eq!(parse_ts("2025-01-01T00:00:00Z").timestamp(), 1_735_689_600);
    }
}
