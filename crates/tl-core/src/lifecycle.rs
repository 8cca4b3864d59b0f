use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tl_db::{ActivityRepository, Database, GroupRepository};
use tl_slack::{OutgoingMessage, SlackApi};
use tl_types::{ActivityKind, NewActivity, Result, TeamLinkError};
use tracing::{error, info, warn};

use crate::cache_store::CacheStore;
use crate::credentials::CredentialCache;
use crate::membership::{record, MembershipSynchronizer, SyncReport};
use crate::naming::normalize_channel_name;

/// Normalized request to create a group's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateChannelInput {
    pub group_id: String,
    pub group_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedChannel {
    pub channel_id: String,
    pub name: String,
    pub welcome_posted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
}

pub struct ChannelLifecycle {
    db: Arc<Database>,
    slack: Arc<dyn SlackApi>,
    credentials: Arc<CredentialCache>,
    sync: Arc<MembershipSynchronizer>,
    cache: Arc<CacheStore>,
    app_base_url: Option<String>,
}

impl ChannelLifecycle {
    pub fn new(
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        credentials: Arc<CredentialCache>,
        sync: Arc<MembershipSynchronizer>,
        cache: Arc<CacheStore>,
        app_base_url: Option<String>,
    ) -> Self {
        Self {
            db,
            slack,
            credentials,
            sync,
            cache,
            app_base_url,
        }
    }

    /// Create a private channel for a group and link it.
    ///
    /// Once the link is stored the channel is kept: welcome and membership
    /// failures are logged and recorded but do not undo the creation.
    pub async fn create_for_group(
        &self,
        actor: &str,
        input: &CreateChannelInput,
    ) -> Result<CreatedChannel> {
        let groups = GroupRepository::new(&self.db);
        let group = groups
            .get_group(&input.group_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("group {}", input.group_id)))?;
        if let Some(existing) = &group.channel_id {
            return Err(TeamLinkError::Conflict(format!(
                "group already linked to channel {existing}"
            )));
        }

        let token = self.credentials.require_token().await?;
        let name = normalize_channel_name(&input.group_name);

        let created = self.slack.create_channel(&token, &name, true).await;
        self.credentials.observe(&created);
        let channel_id = created?;

        if let Err(e) = groups.set_channel(&group.id, &channel_id).await {
            error!(
                group = %group.id,
                channel = %channel_id,
                error = %e,
                "Channel created but link could not be stored"
            );
            return Err(e);
        }
        info!(group = %group.id, channel = %channel_id, name = %name, "Channel created and linked");

        let activity = ActivityRepository::new(&self.db);

        let welcome = OutgoingMessage::bot(&channel_id, self.welcome_text(&input.group_name, &group.id));
        let posted = self.slack.post_message(&token, &welcome).await;
        self.credentials.observe(&posted);
        let welcome_posted = match posted {
            Ok(_) => true,
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Welcome message failed");
                record(
                    &activity,
                    NewActivity::new(actor, ActivityKind::WelcomeFailed)
                        .channel(&channel_id)
                        .group(&group.id)
                        .detail(json!({ "stage": "welcome", "error": e.to_string() })),
                )
                .await;
                false
            }
        };

        let sync = match self
            .sync
            .sync_group_to_channel(actor, &group.id, &channel_id)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Initial membership sync failed");
                record(
                    &activity,
                    NewActivity::new(actor, ActivityKind::WelcomeFailed)
                        .channel(&channel_id)
                        .group(&group.id)
                        .detail(json!({ "stage": "membership", "error": e.to_string() })),
                )
                .await;
                None
            }
        };

        record(
            &activity,
            NewActivity::new(actor, ActivityKind::ChannelCreated)
                .channel(&channel_id)
                .group(&group.id)
                .detail(json!({ "name": name, "group_name": input.group_name })),
        )
        .await;

        Ok(CreatedChannel {
            channel_id,
            name,
            welcome_posted,
            sync,
        })
    }

    /// Archive a group's channel, then clear the link.
    ///
    /// If the platform refuses, the group keeps its link.
    pub async fn archive(&self, actor: &str, channel_id: &str, group_id: &str) -> Result<()> {
        let groups = GroupRepository::new(&self.db);
        let group = groups
            .get_group(group_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("group {group_id}")))?;
        if group.channel_id.as_deref() != Some(channel_id) {
            return Err(TeamLinkError::NotFound(format!(
                "channel {channel_id} is not linked to group {group_id}"
            )));
        }

        let token = self.credentials.require_token().await?;
        let archived = self.slack.archive_channel(&token, channel_id).await;
        self.credentials.observe(&archived);
        archived?;

        groups.clear_channel(group_id, channel_id).await?;
        self.cache.remove(channel_id).await;

        record(
            &ActivityRepository::new(&self.db),
            NewActivity::new(actor, ActivityKind::ChannelArchived)
                .channel(channel_id)
                .group(group_id),
        )
        .await;
        info!(group = %group_id, channel = %channel_id, "Channel archived and unlinked");
        Ok(())
    }

    /// Archive a channel, resolving its group from the stored link.
    pub async fn archive_linked(&self, actor: &str, channel_id: &str) -> Result<()> {
        let group = GroupRepository::new(&self.db)
            .get_by_channel(channel_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("channel {channel_id} is not linked")))?;
        self.archive(actor, channel_id, &group.id).await
    }

    fn welcome_text(&self, group_name: &str, group_id: &str) -> String {
        let mut text = format!(
            "Welcome to the channel for *{}*! Messages posted here show up in TeamLink for every member of the group.",
            group_name.trim()
        );
        if let Some(base) = &self.app_base_url {
            text.push_str(&format!(
                " Open the group: {}/groups/{group_id}",
                base.trim_end_matches('/')
            ));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use std::time::Duration;
    use tl_types::{CachedMessage, MAX_CACHED_MESSAGES};

    fn lifecycle(fx: &Fixture) -> (ChannelLifecycle, Arc<CacheStore>) {
        let cache = Arc::new(CacheStore::new(
            fx.db.clone(),
            MAX_CACHED_MESSAGES,
            Duration::from_secs(300),
        ));
        let sync = Arc::new(MembershipSynchronizer::new(
            fx.db.clone(),
            fx.slack_api(),
            fx.credentials.clone(),
            4,
        ));
        let lifecycle = ChannelLifecycle::new(
            fx.db.clone(),
            fx.slack_api(),
            fx.credentials.clone(),
            sync,
            cache.clone(),
            Some("https://app.example.com/".to_string()),
        );
        (lifecycle, cache)
    }

    fn input(group_id: &str, name: &str) -> CreateChannelInput {
        CreateChannelInput {
            group_id: group_id.to_string(),
            group_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn create_links_welcomes_and_syncs() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team X!!", None).await;
        fx.member("m1", "Alice", Some("U1")).await;
        fx.join("g1", "m1").await;

        let (lifecycle, _) = lifecycle(&fx);
        let created = lifecycle
            .create_for_group("admin", &input("g1", "Team X!!"))
            .await
            .unwrap();

        assert_eq!(created.name, "team-x");
        assert!(created.welcome_posted);
        assert_eq!(created.sync.as_ref().unwrap().added, 1);

        let group = GroupRepository::new(&fx.db).get_group("g1").await.unwrap().unwrap();
        assert_eq!(group.channel_id.as_deref(), Some(created.channel_id.as_str()));

        let posted = fx.slack.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].text.contains("Team X!!"));
        assert!(posted[0].text.contains("https://app.example.com/groups/g1"));

        let activity = ActivityRepository::new(&fx.db).by_group("g1").await.unwrap();
        let kinds: Vec<_> = activity.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&ActivityKind::ChannelCreated));
        assert!(kinds.contains(&ActivityKind::MembersSynced));
    }

    #[tokio::test]
    async fn welcome_is_deterministic() {
        let fx = Fixture::new().await;
        let (lifecycle, _) = lifecycle(&fx);
        assert_eq!(
            lifecycle.welcome_text("Team", "g1"),
            lifecycle.welcome_text("Team", "g1")
        );
    }

    #[tokio::test]
    async fn name_collision_is_conflict_and_leaves_group_unlinked() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team X", None).await;
        fx.slack.add_channel("COTHER", "team-x");

        let (lifecycle, _) = lifecycle(&fx);
        let err = lifecycle
            .create_for_group("admin", &input("g1", "Team X"))
            .await
            .unwrap_err();

        assert!(matches!(err, TeamLinkError::Conflict(_)));
        let group = GroupRepository::new(&fx.db).get_group("g1").await.unwrap().unwrap();
        assert!(group.channel_id.is_none());
    }

    #[tokio::test]
    async fn already_linked_group_is_conflict() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", Some("C1")).await;

        let (lifecycle, _) = lifecycle(&fx);
        let err = lifecycle
            .create_for_group("admin", &input("g1", "Team"))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamLinkError::Conflict(_)));
        assert_eq!(fx.slack.call_count("conversations.create"), 0);
    }

    #[tokio::test]
    async fn welcome_failure_keeps_channel() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", None).await;
        fx.slack.fail("chat.postMessage", "not_in_channel");

        let (lifecycle, _) = lifecycle(&fx);
        let created = lifecycle
            .create_for_group("admin", &input("g1", "Team"))
            .await
            .unwrap();

        assert!(!created.welcome_posted);
        let group = GroupRepository::new(&fx.db).get_group("g1").await.unwrap().unwrap();
        assert_eq!(group.channel_id, Some(created.channel_id));
        let failed = ActivityRepository::new(&fx.db)
            .by_kind(ActivityKind::WelcomeFailed)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let fx = Fixture::new().await;
        let (lifecycle, _) = lifecycle(&fx);
        let err = lifecycle
            .create_for_group("admin", &input("nope", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TeamLinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn archive_clears_link_and_cache() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", Some("C1")).await;
        let (lifecycle, cache) = lifecycle(&fx);
        cache
            .upsert(
                "C1",
                "g1",
                vec![CachedMessage {
                    sender_id: "U1".to_string(),
                    text: "hi".to_string(),
                    ts: "1.0".to_string(),
                    member: None,
                    profile: None,
                }],
            )
            .await;

        lifecycle.archive("admin", "C1", "g1").await.unwrap();

        assert!(fx.slack.is_archived("C1"));
        let group = GroupRepository::new(&fx.db).get_group("g1").await.unwrap().unwrap();
        assert!(group.channel_id.is_none());
        assert!(cache.read("C1").await.is_none());
        let archived = ActivityRepository::new(&fx.db)
            .by_kind(ActivityKind::ChannelArchived)
            .await
            .unwrap();
        assert_eq!(archived.len(), 1);
    }

    #[tokio::test]
    async fn archive_failure_keeps_link() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", Some("C1")).await;
        fx.slack.fail("conversations.archive", "missing_scope");

        let (lifecycle, _) = lifecycle(&fx);
        let err = lifecycle.archive("admin", "C1", "g1").await.unwrap_err();
        assert!(matches!(err, TeamLinkError::Permission(_)));

        let group = GroupRepository::new(&fx.db).get_group("g1").await.unwrap().unwrap();
        assert_eq!(group.channel_id.as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn archive_by_channel_resolves_group() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", Some("C1")).await;
        let (lifecycle, _) = lifecycle(&fx);

        lifecycle.archive_linked("admin", "C1").await.unwrap();
        let err = lifecycle.archive_linked("admin", "C1").await.unwrap_err();
        assert!(matches!(err, TeamLinkError::NotFound(_)));
    }
}
