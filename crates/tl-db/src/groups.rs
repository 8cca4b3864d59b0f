use tl_types::{Group, Member, Result, TeamLinkError};

use crate::connection::{parse_ts, Database};
use crate::members::{row_to_member, MemberRow, MEMBER_COLUMNS};

/// Repository for groups, their channel link and their membership.
pub struct GroupRepository<'a> {
    db: &'a Database,
}

impl<'a> GroupRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Save or update a group (upsert).
    pub async fn save_group(&self, group: &Group) -> Result<()> {
        sqlx::query(
            "INSERT INTO groups (id, name, channel_id, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, channel_id = excluded.channel_id",
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.channel_id)
        .bind(group.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Save group: {e}")))?;

        Ok(())
    }

    /// Get a group by id.
    pub async fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let row: Option<GroupRow> = sqlx::query_as(
            "SELECT id, name, channel_id, created_at FROM groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get group: {e}")))?;

        Ok(row.map(row_to_group))
    }

    /// Get the group linked to a channel.
    pub async fn get_by_channel(&self, channel_id: &str) -> Result<Option<Group>> {
        let row: Option<GroupRow> = sqlx::query_as(
            "SELECT id, name, channel_id, created_at FROM groups WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get group by channel: {e}")))?;

        Ok(row.map(row_to_group))
    }

    /// Get all groups.
    pub async fn get_all(&self) -> Result<Vec<Group>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT id, name, channel_id, created_at FROM groups ORDER BY name ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get all groups: {e}")))?;

        Ok(rows.into_iter().map(row_to_group).collect())
    }

    /// Link a channel to a group, replacing any previous link.
    pub async fn set_channel(&self, group_id: &str, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE groups SET channel_id = ? WHERE id = ?")
            .bind(channel_id)
            .bind(group_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Link channel: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear the group's link, but only if it still points at `channel_id`.
    pub async fn clear_channel(&self, group_id: &str, channel_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE groups SET channel_id = NULL WHERE id = ? AND channel_id = ?")
                .bind(group_id)
                .bind(channel_id)
                .execute(self.db.pool())
                .await
                .map_err(|e| TeamLinkError::Database(format!("Unlink channel: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Add a member to a group. Adding twice is a no-op.
    pub async fn add_member(&self, group_id: &str, member_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO group_members (group_id, member_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(member_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Add group member: {e}")))?;

        Ok(())
    }

    pub async fn remove_member(&self, group_id: &str, member_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND member_id = ?")
            .bind(group_id)
            .bind(member_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Remove group member: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_member(&self, group_id: &str, member_id: &str) -> Result<bool> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM group_members WHERE group_id = ? AND member_id = ?")
                .bind(group_id)
                .bind(member_id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(|e| TeamLinkError::Database(format!("Check group member: {e}")))?;

        Ok(row.is_some())
    }

    /// All members of a group, linked or not.
    pub async fn members_of(&self, group_id: &str) -> Result<Vec<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members m
             JOIN group_members gm ON gm.member_id = m.id
             WHERE gm.group_id = ?
             ORDER BY m.display_name ASC"
        );
        let rows: Vec<MemberRow> = sqlx::query_as(&sql)
            .bind(group_id)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| TeamLinkError::Database(format!("Get group members: {e}")))?;

        Ok(rows.into_iter().map(row_to_member).collect())
    }

    /// Groups a member belongs to.
    pub async fn groups_for_member(&self, member_id: &str) -> Result<Vec<Group>> {
        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT g.id, g.name, g.channel_id, g.created_at FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.member_id = ?
             ORDER BY g.name ASC",
        )
        .bind(member_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| TeamLinkError::Database(format!("Get member groups: {e}")))?;

        Ok(rows.into_iter().map(row_to_group).collect())
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: String,
    name: String,
    channel_id: Option<String>,
    created_at: String,
}

fn row_to_group(row: GroupRow) -> Group {
    Group {
        id: row.id,
        name: row.name,
        channel_id: row.channel_id,
        created_at: parse_ts(&row.created_at),
    }
}
