use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application-level group. Owns at most one linked chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            channel_id: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the group has chat activity at all.
    pub fn has_channel(&self) -> bool {
        self.channel_id.is_some()
    }
}
