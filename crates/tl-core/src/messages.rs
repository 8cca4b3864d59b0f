use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tl_db::{Database, GroupRepository};
use tl_slack::{Attribution, FileUpload, OutgoingMessage, PostedMessage, SlackApi};
use tl_types::{
    CacheEntry, CachedMessage, Group, Member, NewMessageNotification, Result, TeamLinkError,
};
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::cache_store::CacheStore;
use crate::credentials::CredentialCache;
use crate::fetcher::MessageFetcher;

/// Slack rejects message text beyond this length.
const MAX_MESSAGE_LEN: usize = 40_000;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelPreview {
    pub group_id: String,
    pub channel_id: Option<String>,
    pub messages: Vec<CachedMessage>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Served from an entry past the staleness threshold.
    pub stale: bool,
}

impl ChannelPreview {
    fn empty(group_id: &str, channel_id: Option<String>) -> Self {
        Self {
            group_id: group_id.to_string(),
            channel_id,
            messages: Vec::new(),
            last_updated: None,
            stale: false,
        }
    }

    fn from_entry(entry: CacheEntry, stale: bool) -> Self {
        Self {
            group_id: entry.group_id,
            channel_id: Some(entry.channel_id),
            messages: entry.messages,
            last_updated: Some(entry.last_updated),
            stale,
        }
    }
}

/// File posted into a group's channel.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub comment: Option<String>,
}

pub struct MessageService {
    db: Arc<Database>,
    slack: Arc<dyn SlackApi>,
    credentials: Arc<CredentialCache>,
    fetcher: Arc<MessageFetcher>,
    cache: Arc<CacheStore>,
    hub: Arc<BroadcastHub>,
    refreshing: Mutex<HashSet<String>>,
}

impl MessageService {
    pub fn new(
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        credentials: Arc<CredentialCache>,
        fetcher: Arc<MessageFetcher>,
        cache: Arc<CacheStore>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            db,
            slack,
            credentials,
            fetcher,
            cache,
            hub,
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// Cached preview for one group.
    ///
    /// Fresh entries are served as is, stale ones while a background refresh
    /// runs, and missing ones are fetched inline. A missing or rejected bot
    /// token is returned as an error here.
    pub async fn preview(self: &Arc<Self>, group_id: &str) -> Result<ChannelPreview> {
        let group = self.group(group_id).await?;
        let mut previews = self.previews_for(vec![group], true).await?;
        Ok(previews
            .pop()
            .unwrap_or_else(|| ChannelPreview::empty(group_id, None)))
    }

    /// Cached previews for several groups, reading the cache in one batch.
    /// Unknown group ids are skipped. A group whose fetch fails gets an
    /// empty preview; the others are still returned.
    pub async fn previews(self: &Arc<Self>, group_ids: &[String]) -> Result<Vec<ChannelPreview>> {
        let repo = GroupRepository::new(&self.db);
        let mut groups = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            if let Some(group) = repo.get_group(id).await? {
                groups.push(group);
            }
        }
        self.previews_for(groups, false).await
    }

    async fn previews_for(
        self: &Arc<Self>,
        groups: Vec<Group>,
        surface_config_errors: bool,
    ) -> Result<Vec<ChannelPreview>> {
        let channel_ids: Vec<String> = groups.iter().filter_map(|g| g.channel_id.clone()).collect();
        let mut entries = self.cache.read_many(&channel_ids).await;

        let mut previews = Vec::with_capacity(groups.len());
        for group in groups {
            let Some(channel_id) = group.channel_id else {
                previews.push(ChannelPreview::empty(&group.id, None));
                continue;
            };

            let preview = match entries.remove(&channel_id) {
                Some(entry) if self.cache.is_stale(&entry) => {
                    self.spawn_refresh(&channel_id, &group.id);
                    ChannelPreview::from_entry(entry, true)
                }
                Some(entry) => ChannelPreview::from_entry(entry, false),
                None => match self.refresh_channel(&channel_id, &group.id).await {
                    Ok(entry) => ChannelPreview::from_entry(entry, false),
                    Err(e @ (TeamLinkError::Config(_) | TeamLinkError::Authentication(_)))
                        if surface_config_errors =>
                    {
                        return Err(e)
                    }
                    Err(e) => {
                        warn!(channel = %channel_id, error = %e, "Preview fetch failed, serving empty");
                        ChannelPreview::empty(&group.id, Some(channel_id))
                    }
                },
            };
            previews.push(preview);
        }
        Ok(previews)
    }

    /// Refetch a group's channel and replace its cache entry.
    pub async fn refresh(&self, group_id: &str) -> Result<ChannelPreview> {
        let group = self.group(group_id).await?;
        let channel_id = linked_channel(&group)?;
        let entry = self.refresh_channel(channel_id, &group.id).await?;
        Ok(ChannelPreview::from_entry(entry, false))
    }

    /// Post `text` to the group's channel on behalf of `member`.
    pub async fn post(&self, member: &Member, group_id: &str, text: &str) -> Result<PostedMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TeamLinkError::Validation("message text is required".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(TeamLinkError::Validation(format!(
                "message text exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let group = self.writable_group(member, group_id).await?;
        let channel_id = linked_channel(&group)?;
        let token = self.credentials.require_token().await?;

        let message = OutgoingMessage::attributed(channel_id, text, attribution(member));
        let posted = self.slack.post_message(&token, &message).await;
        self.credentials.observe(&posted);
        let posted = posted?;

        info!(group = %group.id, channel = %channel_id, member = %member.id, "Message posted");
        self.after_write(channel_id, &group.id, &member.id).await;
        Ok(posted)
    }

    /// Delete a message. Members may delete their own posts; admins any.
    pub async fn delete(&self, member: &Member, group_id: &str, ts: &str) -> Result<()> {
        let group = self.writable_group(member, group_id).await?;
        let channel_id = linked_channel(&group)?;
        let token = self.credentials.require_token().await?;

        let found = self.slack.message_at(&token, channel_id, ts).await;
        self.credentials.observe(&found);
        let message = found?.ok_or_else(|| TeamLinkError::NotFound("message not found".to_string()))?;

        let own = message.posted_by_member.as_deref() == Some(member.id.as_str())
            || (message.posted_by_member.is_none()
                && message.user.is_some()
                && message.user.as_deref() == member.external_user_id());
        if !own && !member.is_admin {
            return Err(TeamLinkError::Permission(
                "cannot delete a message posted by someone else".to_string(),
            ));
        }

        let deleted = self.slack.delete_message(&token, channel_id, ts).await;
        self.credentials.observe(&deleted);
        deleted?;

        info!(group = %group.id, channel = %channel_id, ts, member = %member.id, "Message deleted");
        self.after_write(channel_id, &group.id, &member.id).await;
        Ok(())
    }

    /// Upload a file into the group's channel. Returns the platform file id.
    pub async fn upload(&self, member: &Member, group_id: &str, upload: NewUpload) -> Result<String> {
        if upload.filename.trim().is_empty() {
            return Err(TeamLinkError::Validation("file name is required".to_string()));
        }
        if upload.bytes.is_empty() {
            return Err(TeamLinkError::Validation("file is empty".to_string()));
        }

        let group = self.writable_group(member, group_id).await?;
        let channel_id = linked_channel(&group)?;
        let token = self.credentials.require_token().await?;

        let initial_comment = match upload.comment.as_deref().map(str::trim) {
            Some(comment) if !comment.is_empty() => {
                format!("*{}*: {comment}", member.display_name)
            }
            _ => format!("*{}* shared {}", member.display_name, upload.filename),
        };
        let file = FileUpload {
            channel: channel_id.to_string(),
            filename: upload.filename,
            bytes: upload.bytes,
            initial_comment: Some(initial_comment),
        };

        let uploaded = self.slack.upload_file(&token, &file).await;
        self.credentials.observe(&uploaded);
        let file_id = uploaded?;

        info!(group = %group.id, channel = %channel_id, file = %file_id, "File uploaded");
        self.after_write(channel_id, &group.id, &member.id).await;
        Ok(file_id)
    }

    async fn group(&self, group_id: &str) -> Result<Group> {
        GroupRepository::new(&self.db)
            .get_group(group_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("group {group_id}")))
    }

    /// Group the member may write to: linked identity plus membership.
    async fn writable_group(&self, member: &Member, group_id: &str) -> Result<Group> {
        if member.identity.is_none() {
            return Err(TeamLinkError::Permission(
                "link your Slack account before posting".to_string(),
            ));
        }
        let group = self.group(group_id).await?;
        if !member.is_admin
            && !GroupRepository::new(&self.db)
                .is_member(group_id, &member.id)
                .await?
        {
            return Err(TeamLinkError::Permission("not a member of this group".to_string()));
        }
        Ok(group)
    }

    async fn refresh_channel(&self, channel_id: &str, group_id: &str) -> Result<CacheEntry> {
        let messages = self
            .fetcher
            .fetch_recent(channel_id, self.cache.max_messages())
            .await?;
        Ok(self.cache.upsert(channel_id, group_id, messages).await)
    }

    /// Refresh the cache in the background unless one is already running
    /// for this channel.
    fn spawn_refresh(self: &Arc<Self>, channel_id: &str, group_id: &str) {
        {
            let mut running = self.refreshing.lock().unwrap_or_else(|e| e.into_inner());
            if !running.insert(channel_id.to_string()) {
                return;
            }
        }

        let this = Arc::clone(self);
        let channel_id = channel_id.to_string();
        let group_id = group_id.to_string();
        tokio::spawn(async move {
            let _guard = RefreshGuard {
                service: Arc::clone(&this),
                channel_id: channel_id.clone(),
            };
            match this.refresh_channel(&channel_id, &group_id).await {
                Ok(entry) => debug!(channel = %channel_id, count = entry.messages.len(), "Background refresh done"),
                Err(e) => warn!(channel = %channel_id, error = %e, "Background refresh failed"),
            }
        });
    }

    #[cfg(test)]
    fn is_refreshing(&self, channel_id: &str) -> bool {
        self.refreshing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(channel_id)
    }

    async fn after_write(&self, channel_id: &str, group_id: &str, member_id: &str) {
        if let Err(e) = self.refresh_channel(channel_id, group_id).await {
            warn!(channel = %channel_id, error = %e, "Cache refresh after write failed");
        }
        self.hub
            .publish(
                group_id,
                &NewMessageNotification::now(channel_id, group_id, member_id),
            )
            .await;
    }
}

/// Clears a channel's in-flight refresh marker, also when the task unwinds.
struct RefreshGuard {
    service: Arc<MessageService>,
    channel_id: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.service
            .refreshing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.channel_id);
    }
}

fn linked_channel(group: &Group) -> Result<&str> {
    group
        .channel_id
        .as_deref()
        .ok_or_else(|| TeamLinkError::NotFound("group has no linked channel".to_string()))
}

fn attribution(member: &Member) -> Attribution {
    Attribution {
        member_id: member.id.clone(),
        display_name: member.display_name.clone(),
        avatar_url: member.avatar_url.clone(),
    }
}
