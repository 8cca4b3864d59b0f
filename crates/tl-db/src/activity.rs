use chrono::Utc;
use tl_types::{ActivityKind, NewActivity, Result, SyncActivity, TeamLinkError};

use crate::connection::{parse_ts, Database};

/// Append-only repository for the sync activity log.
pub struct ActivityRepository<'a> {
    db: &'a Database,
}

impl<'a> ActivityRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append an entry. Returns the new row id.
    pub async fn record(&self, activity: &NewActivity) -> Result<i64> {
        let detail = serde_json::to_string(&activity.detail)?;

        let result = sqlx::query(
            "INSERT INTO sync_activity (actor, kind, channel_id, group_id, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&activity.actor)
        .bind(activity.kind.as_str())
        .bind(&activity.channel_id)
        .bind(&activity.group_id)
        .bind(&detail)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Record activity: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<SyncActivity>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, actor, kind, channel_id, group_id, detail, created_at
             FROM sync_activity ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get recent activity: {e}")))?;

        Ok(rows.into_iter().filter_map(row_to_activity).collect())
    }

    /// Entries for one group, oldest first.
    pub async fn by_group(&self, group_id: &str) -> Result<Vec<SyncActivity>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, actor, kind, channel_id, group_id, detail, created_at
             FROM sync_activity WHERE group_id = ? ORDER BY id ASC",
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get group activity: {e}")))?;

        Ok(rows.into_iter().filter_map(row_to_activity).collect())
    }

    /// Entries of one kind, oldest first.
    pub async fn by_kind(&self, kind: ActivityKind) -> Result<Vec<SyncActivity>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(
            "SELECT id, actor, kind, channel_id, group_id, detail, created_at
             FROM sync_activity WHERE kind = ? ORDER BY id ASC",
        )
        .bind(kind.as_str())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get activity by kind: {e}")))?;

        Ok(rows.into_iter().filter_map(row_to_activity).collect())
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: i64,
    actor: String,
    kind: String,
    channel_id: Option<String>,
    group_id: Option<String>,
    detail: Option<String>,
    created_at: String,
}

fn row_to_activity(row: ActivityRow) -> Option<SyncActivity> {
    // Rows written by a newer build may carry kinds we don't know yet.
    let kind = ActivityKind::parse(&row.kind)?;
    let detail = row
        .detail
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(serde_json::Value::Null);

    Some(SyncActivity {
        id: row.id,
        actor: row.actor,
        kind,
        channel_id: row.channel_id,
        group_id: row.group_id,
        detail,
        created_at: parse_ts(&row.created_at),
    })
}
