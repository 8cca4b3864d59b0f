use chrono::{DateTime, Utc};
use tl_types::{ExternalIdentity, Member, Result, TeamLinkError};

use crate::connection::{parse_ts, Database};

pub(crate) const MEMBER_COLUMNS: &str = "m.id, m.display_name, m.email, m.avatar_url, m.is_admin, \
     m.external_user_id, m.external_access_token, m.linked_at";

/// Repository for members and their linked chat identity.
pub struct MemberRepository<'a> {
    db: &'a Database,
}

impl<'a> MemberRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Save or update a member's profile (upsert). Identity columns are
    /// only written by [`link_identity`](Self::link_identity).
    pub async fn save_member(&self, member: &Member) -> Result<()> {
        sqlx::query(
            "INSERT INTO members (id, display_name, email, avatar_url, is_admin)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                avatar_url = excluded.avatar_url,
                is_admin = excluded.is_admin",
        )
        .bind(&member.id)
        .bind(&member.display_name)
        .bind(&member.email)
        .bind(&member.avatar_url)
        .bind(member.is_admin as i32)
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Save member: {e}")))?;

        Ok(())
    }

    /// Get a member by id.
    pub async fn get_member(&self, id: &str) -> Result<Option<Member>> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members m WHERE m.id = ?");
        let row: Option<MemberRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get member: {e}")))?;

        Ok(row.map(row_to_member))
    }

    /// Get several members by application id.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Member>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members m WHERE m.id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, MemberRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get members: {e}")))?;

        Ok(rows.into_iter().map(row_to_member).collect())
    }

    /// Get members whose linked external user id is in `external_ids`.
    pub async fn get_by_external_ids(&self, external_ids: &[String]) -> Result<Vec<Member>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members m WHERE m.external_user_id IN ({})",
            placeholders(external_ids.len())
        );
        let mut query = sqlx::query_as::<_, MemberRow>(&sql);
        for id in external_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get members by external id: {e}")))?;

        Ok(rows.into_iter().map(row_to_member).collect())
    }

    /// Persist a linked external identity.
    pub async fn link_identity(
        &self,
        member_id: &str,
        external_user_id: &str,
        access_token: &str,
        linked_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE members
             SET external_user_id = ?, external_access_token = ?, linked_at = ?
             WHERE id = ?",
        )
        .bind(external_user_id)
        .bind(access_token)
        .bind(linked_at.to_rfc3339())
        .bind(member_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Link identity: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear a member's linked identity. Returns false if none was linked.
    pub async fn clear_identity(&self, member_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE members
             SET external_user_id = NULL, external_access_token = NULL, linked_at = NULL
             WHERE id = ? AND external_user_id IS NOT NULL",
        )
        .bind(member_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Clear identity: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(sqlx::FromRow)]
pub(crate) struct MemberRow {
    id: String,
    display_name: String,
    email: Option<String>,
    avatar_url: Option<String>,
    is_admin: i32,
    external_user_id: Option<String>,
    external_access_token: Option<String>,
    linked_at: Option<String>,
}

pub(crate) fn row_to_member(row: MemberRow) -> Member {
    let identity = row.external_user_id.map(|user_id| ExternalIdentity {
        user_id,
        access_token: row.external_access_token.unwrap_or_default(),
        linked_at: row
            .linked_at
            .as_deref()
            .map(parse_ts)
            .unwrap_or_default(),
    });

    Member {
        id: row.id,
        display_name: row.display_name,
        email: row.email,
        avatar_url: row.avatar_url,
        is_admin: row.is_admin != 0,
        identity,
    }
}
