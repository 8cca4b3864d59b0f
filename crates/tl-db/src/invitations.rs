use chrono::{DateTime, Utc};
use tl_types::{Invitation, InvitationStatus, Result, TeamLinkError};

use crate::connection::{parse_ts, Database};

/// Repository for workspace invitations (one row per member).
pub struct InvitationRepository<'a> {
    db: &'a Database,
}

impl<'a> InvitationRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create or refresh a member's invitation as pending.
    pub async fn upsert_pending(&self, member_id: &str, now: DateTime<Utc>) -> Result<Invitation> {
        sqlx::query(
            "INSERT INTO invitations (member_id, status, requested_at, completed_at, completed_by)
             VALUES (?, 'pending', ?, NULL, NULL)
             ON CONFLICT(member_id) DO UPDATE SET
                status = 'pending',
                requested_at = excluded.requested_at,
                completed_at = NULL,
                completed_by = NULL",
        )
        .bind(member_id)
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Upsert invitation: {e}")))?;

        Ok(Invitation {
            member_id: member_id.to_string(),
            status: InvitationStatus::Pending,
            requested_at: now,
            completed_at: None,
            completed_by: None,
        })
    }

    pub async fn get(&self, member_id: &str) -> Result<Option<Invitation>> {
        let row: Option<InvitationRow> = sqlx::query_as(
            "SELECT member_id, status, requested_at, completed_at, completed_by
             FROM invitations WHERE member_id = ?",
        )
        .bind(member_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get invitation: {e}")))?;

        Ok(row.map(row_to_invitation))
    }

    /// Mark an invitation completed. Returns false if there is none.
    pub async fn mark_completed(
        &self,
        member_id: &str,
        completed_by: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'completed', completed_at = ?, completed_by = ?
             WHERE member_id = ?",
        )
        .bind(now.to_rfc3339())
        .bind(completed_by)
        .bind(member_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Complete invitation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending invitations, oldest request first.
    pub async fn list_pending(&self) -> Result<Vec<Invitation>> {
        let rows: Vec<InvitationRow> = sqlx::query_as(
            "SELECT member_id, status, requested_at, completed_at, completed_by
             FROM invitations WHERE status = 'pending' ORDER BY requested_at ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("List pending invitations: {e}")))?;

        Ok(rows.into_iter().map(row_to_invitation).collect())
    }
}

#[derive(sqlx::FromRow)]
struct InvitationRow {
    member_id: String,
    status: String,
    requested_at: String,
    completed_at: Option<String>,
    completed_by: Option<String>,
}

fn row_to_invitation(row: InvitationRow) -> Invitation {
    let status = match row.status.as_str() {
        "completed" => InvitationStatus::Completed,
        _ => InvitationStatus::Pending,
    };

    Invitation {
        member_id: row.member_id,
        status,
        requested_at: parse_ts(&row.requested_at),
        completed_at: row.completed_at.as_deref().map(parse_ts),
        completed_by: row.completed_by,
    }
}
