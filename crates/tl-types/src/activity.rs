use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of entries in the append-only sync activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ChannelCreated,
    ChannelArchived,
    WelcomeFailed,
    MembersSynced,
    MemberAddFailed,
    IdentityLinked,
    IdentityUnlinked,
    InvitationRequested,
    InvitationCompleted,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelCreated => "channel_created",
            Self::ChannelArchived => "channel_archived",
            Self::WelcomeFailed => "welcome_failed",
            Self::MembersSynced => "members_synced",
            Self::MemberAddFailed => "member_add_failed",
            Self::IdentityLinked => "identity_linked",
            Self::IdentityUnlinked => "identity_unlinked",
            Self::InvitationRequested => "invitation_requested",
            Self::InvitationCompleted => "invitation_completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "channel_created" => Self::ChannelCreated,
            "channel_archived" => Self::ChannelArchived,
            "welcome_failed" => Self::WelcomeFailed,
            "members_synced" => Self::MembersSynced,
            "member_add_failed" => Self::MemberAddFailed,
            "identity_linked" => Self::IdentityLinked,
            "identity_unlinked" => Self::IdentityUnlinked,
            "invitation_requested" => Self::InvitationRequested,
            "invitation_completed" => Self::InvitationCompleted,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity to append. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub actor: String,
    pub kind: ActivityKind,
    pub channel_id: Option<String>,
    pub group_id: Option<String>,
    pub detail: serde_json::Value,
}

impl NewActivity {
    pub fn new(actor: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            actor: actor.into(),
            kind,
            channel_id: None,
            group_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Stored audit entry. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncActivity {
    pub id: i64,
    pub actor: String,
    pub kind: ActivityKind,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_string_roundtrip() {
        for kind in [
            ActivityKind::ChannelCreated,
            ActivityKind::ChannelArchived,
            ActivityKind::WelcomeFailed,
            ActivityKind::MembersSynced,
            ActivityKind::MemberAddFailed,
            ActivityKind::IdentityLinked,
            ActivityKind::IdentityUnlinked,
            ActivityKind::InvitationRequested,
            ActivityKind::InvitationCompleted,
        ] {
            assert_eq!(ActivityKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ActivityKind::parse("bogus"), None);
    }

    #[test]
    fn builder_sets_references() {
        let activity = NewActivity::new("admin-1", ActivityKind::ChannelCreated)
            .channel("C1")
            .group("g1")
            .detail(serde_json::json!({"name": "team-x"}));
        assert_eq!(activity.channel_id.as_deref(), Some("C1"));
        assert_eq!(activity.group_id.as_deref(), Some("g1"));
        assert_eq!(activity.detail["name"], "team-x");
    }
}
