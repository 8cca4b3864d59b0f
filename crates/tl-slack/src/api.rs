use async_trait::async_trait;
use tl_types::{ExternalProfile, Result};

/// Member shown as the author of a message the bot posts on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub member_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel: String,
    pub text: String,
    pub attribution: Option<Attribution>,
}

impl OutgoingMessage {
    /// Plain bot message without attribution.
    pub fn bot(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            attribution: None,
        }
    }

    pub fn attributed(
        channel: impl Into<String>,
        text: impl Into<String>,
        attribution: Attribution,
    ) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            attribution: Some(attribution),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub channel: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub initial_comment: Option<String>,
}

/// One entry of `conversations.history`, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawMessage {
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub text: String,
    pub ts: String,
    pub subtype: Option<String>,
    /// Application member id carried in message metadata for posts the
    /// bot made on a member's behalf.
    pub posted_by_member: Option<String>,
}

impl RawMessage {
    /// External id used as the sender key. Falls back to the bot id.
    pub fn sender_id(&self) -> &str {
        self.user
            .as_deref()
            .or(self.bot_id.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteOutcome {
    Added,
    AlreadyMember,
}

/// Operations TeamLink consumes from the chat platform.
///
/// Every call takes the bot token explicitly; callers obtain it from the
/// credential cache and report authentication failures back to it.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Create a channel and return its id.
    async fn create_channel(&self, token: &str, name: &str, is_private: bool) -> Result<String>;

    /// Archive a channel. An already archived channel is not an error.
    async fn archive_channel(&self, token: &str, channel: &str) -> Result<()>;

    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> Result<PostedMessage>;

    async fn delete_message(&self, token: &str, channel: &str, ts: &str) -> Result<()>;

    /// Upload a file into a channel. Returns the file id.
    async fn upload_file(&self, token: &str, upload: &FileUpload) -> Result<String>;

    async fn history(&self, token: &str, channel: &str, limit: usize) -> Result<Vec<RawMessage>>;

    /// Single message lookup by timestamp.
    async fn message_at(&self, token: &str, channel: &str, ts: &str)
        -> Result<Option<RawMessage>>;

    async fn user_info(&self, token: &str, user_id: &str) -> Result<ExternalProfile>;

    async fn invite_to_channel(
        &self,
        token: &str,
        channel: &str,
        user_id: &str,
    ) -> Result<InviteOutcome>;

    /// Invite an email address to the workspace, joined to `channel_ids`.
    async fn invite_to_workspace(
        &self,
        token: &str,
        team_id: &str,
        email: &str,
        channel_ids: &[String],
    ) -> Result<()>;
}
