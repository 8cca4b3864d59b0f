use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tl_db::{ActivityRepository, Database, GroupRepository, MemberRepository};
use tl_slack::{InviteOutcome, SlackApi};
use tl_types::{ActivityKind, Member, NewActivity, Result, TeamLinkError};
use tracing::{debug, info, warn};

use crate::credentials::CredentialCache;

#[derive(Debug, Clone, Serialize)]
pub struct MemberFailure {
    pub member_id: String,
    pub external_user_id: String,
    pub error: String,
}

/// Outcome of one group-to-channel pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub group_id: String,
    pub channel_id: String,
    pub added: usize,
    pub already_member: usize,
    /// Members without a linked identity.
    pub skipped: usize,
    pub failed: Vec<MemberFailure>,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.added + self.already_member + self.failed.len()
    }
}

/// Outcome of adding one member to all channels of their groups.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemberSyncReport {
    pub member_id: String,
    pub added: usize,
    pub already_member: usize,
    /// `(channel_id, error)` pairs.
    pub failed: Vec<(String, String)>,
}

pub struct MembershipSynchronizer {
    db: Arc<Database>,
    slack: Arc<dyn SlackApi>,
    credentials: Arc<CredentialCache>,
    max_concurrent: usize,
}

impl MembershipSynchronizer {
    pub fn new(
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        credentials: Arc<CredentialCache>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            db,
            slack,
            credentials,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Add every linked member of `group_id` to `channel_id`.
    ///
    /// Individual failures are recorded and reported, never propagated.
    pub async fn sync_group_to_channel(
        &self,
        actor: &str,
        group_id: &str,
        channel_id: &str,
    ) -> Result<SyncReport> {
        let token = self.credentials.require_token().await?;
        let members = GroupRepository::new(&self.db).members_of(group_id).await?;

        let mut report = SyncReport {
            group_id: group_id.to_string(),
            channel_id: channel_id.to_string(),
            ..Default::default()
        };

        let linked: Vec<(Member, String)> = members
            .into_iter()
            .filter_map(|m| match m.external_user_id().map(str::to_string) {
                Some(ext) => Some((m, ext)),
                None => {
                    report.skipped += 1;
                    None
                }
            })
            .collect();

        let outcomes: Vec<(Member, String, Result<InviteOutcome>)> = stream::iter(linked)
            .map(|(member, ext)| {
                let token = token.as_str();
                async move {
                    let outcome = self.slack.invite_to_channel(token, channel_id, &ext).await;
                    (member, ext, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let activity = ActivityRepository::new(&self.db);
        for (member, ext, outcome) in outcomes {
            self.credentials.observe(&outcome);
            match outcome {
                Ok(InviteOutcome::Added) => report.added += 1,
                Ok(InviteOutcome::AlreadyMember) => report.already_member += 1,
                Err(e) => {
                    warn!(
                        member = %member.id,
                        channel = %channel_id,
                        error = %e,
                        "Failed to add member to channel"
                    );
                    record(
                        &activity,
                        NewActivity::new(actor, ActivityKind::MemberAddFailed)
                            .channel(channel_id)
                            .group(group_id)
                            .detail(json!({
                                "member_id": member.id,
                                "external_user_id": ext,
                                "error": e.to_string(),
                            })),
                    )
                    .await;
                    report.failed.push(MemberFailure {
                        member_id: member.id,
                        external_user_id: ext,
                        error: e.to_string(),
                    });
                }
            }
        }

        record(
            &activity,
            NewActivity::new(actor, ActivityKind::MembersSynced)
                .channel(channel_id)
                .group(group_id)
                .detail(json!({
                    "added": report.added,
                    "already_member": report.already_member,
                    "skipped": report.skipped,
                    "failed": report.failed.len(),
                })),
        )
        .await;

        info!(
            group = %group_id,
            channel = %channel_id,
            added = report.added,
            already_member = report.already_member,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Group membership synced"
        );
        Ok(report)
    }

    /// Add one member to the linked channel of every group they belong to.
    pub async fn sync_member(&self, actor: &str, member_id: &str) -> Result<MemberSyncReport> {
        let member = MemberRepository::new(&self.db)
            .get_member(member_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("member {member_id}")))?;
        let Some(ext) = member.external_user_id().map(str::to_string) else {
            debug!(member = %member_id, "Member has no linked identity, nothing to sync");
            return Ok(MemberSyncReport {
                member_id: member_id.to_string(),
                ..Default::default()
            });
        };

        let channels: Vec<(String, String)> = GroupRepository::new(&self.db)
            .groups_for_member(member_id)
            .await?
            .into_iter()
            .filter_map(|g| g.channel_id.map(|c| (g.id, c)))
            .collect();

        let mut report = MemberSyncReport {
            member_id: member_id.to_string(),
            ..Default::default()
        };
        if channels.is_empty() {
            return Ok(report);
        }

        let token = self.credentials.require_token().await?;
        let activity = ActivityRepository::new(&self.db);
        for (group_id, channel_id) in channels {
            let outcome = self.slack.invite_to_channel(&token, &channel_id, &ext).await;
            self.credentials.observe(&outcome);
            match outcome {
                Ok(InviteOutcome::Added) => report.added += 1,
                Ok(InviteOutcome::AlreadyMember) => report.already_member += 1,
                Err(e) => {
                    warn!(member = %member_id, channel = %channel_id, error = %e, "Failed to add member to channel");
                    record(
                        &activity,
                        NewActivity::new(actor, ActivityKind::MemberAddFailed)
                            .channel(&channel_id)
                            .group(&group_id)
                            .detail(json!({
                                "member_id": member_id,
                                "external_user_id": ext,
                                "error": e.to_string(),
                            })),
                    )
                    .await;
                    report.failed.push((channel_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

/// Append to the activity log; failures are logged only.
pub(crate) async fn record(repo: &ActivityRepository<'_>, activity: NewActivity) {
    if let Err(e) = repo.record(&activity).await {
        warn!(kind = %activity.kind, error = %e, "Failed to record sync activity");
    }
}
