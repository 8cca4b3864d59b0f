use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Invitation status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Completed,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// Workspace invitation requested by a member. One per member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub member_id: String,
    #[serde(default)]
    pub status: InvitationStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_by: Option<String>,
}
