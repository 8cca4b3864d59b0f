use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External chat identity attached to a member by the account-linking flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub user_id: String,
    /// User-scoped token from the OAuth exchange. Never leaves the server.
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub linked_at: DateTime<Utc>,
}

/// Application user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub identity: Option<ExternalIdentity>,
}

impl Member {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
            avatar_url: None,
            is_admin: false,
            identity: None,
        }
    }

    /// External user id, if the member has linked a chat account.
    pub fn external_user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    pub fn as_ref_snapshot(&self) -> MemberRef {
        MemberRef {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Lightweight member reference embedded in cached messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}
