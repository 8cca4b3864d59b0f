use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::member::MemberRef;

/// Upper bound on messages kept per channel cache entry.
pub const MAX_CACHED_MESSAGES: usize = 5;

/// Cache entries older than this are refreshed in the background.
pub const STALE_AFTER_SECS: i64 = 300;

/// Profile snapshot looked up from the chat platform for senders that are
/// not application members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProfile {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One message captured from channel history. Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub sender_id: String,
    pub text: String,
    /// Platform timestamp (`ts`), also the message's identifier.
    pub ts: String,
    #[serde(default)]
    pub member: Option<MemberRef>,
    #[serde(default)]
    pub profile: Option<ExternalProfile>,
}

impl CachedMessage {
    /// Best display name available for the sender.
    pub fn sender_name(&self) -> &str {
        if let Some(member) = &self.member {
            return &member.display_name;
        }
        if let Some(profile) = &self.profile {
            return &profile.display_name;
        }
        &self.sender_id
    }
}

/// Cached preview of a channel's most recent messages, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub channel_id: String,
    pub group_id: String,
    pub messages: Vec<CachedMessage>,
    pub last_updated: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_updated
    }

    pub fn age_in_seconds(&self) -> i64 {
        self.age_at(Utc::now()).num_seconds()
    }

    /// Stale means strictly older than `threshold`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age_at(now) > threshold
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now(), Duration::seconds(STALE_AFTER_SECS))
    }
}

/// Refresh signal fanned out to a group's listeners after a write.
///
/// Carries no message text: recipients re-read the cache or refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessageNotification {
    pub channel_id: String,
    pub group_id: String,
    /// Acting member id.
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessageNotification {
    pub fn now(
        channel_id: impl Into<String>,
        group_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            group_id: group_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }
}
