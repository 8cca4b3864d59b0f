use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tl_db::{ActivityRepository, Database, GroupRepository, InvitationRepository, MemberRepository};
use tl_slack::SlackApi;
use tl_types::{ActivityKind, Invitation, Member, NewActivity, Result, TeamLinkError};
use tracing::info;

use crate::credentials::CredentialCache;
use crate::membership::record;

pub struct InvitationService {
    db: Arc<Database>,
    slack: Arc<dyn SlackApi>,
    credentials: Arc<CredentialCache>,
    team_id: Option<String>,
}

impl InvitationService {
    pub fn new(
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        credentials: Arc<CredentialCache>,
        team_id: Option<String>,
    ) -> Self {
        Self {
            db,
            slack,
            credentials,
            team_id,
        }
    }

    /// Request an invitation. Repeated requests refresh the pending row.
    pub async fn request(&self, member_id: &str) -> Result<Invitation> {
        self.member(member_id).await?;
        let invitation = InvitationRepository::new(&self.db)
            .upsert_pending(member_id, Utc::now())
            .await?;
        record(
            &ActivityRepository::new(&self.db),
            NewActivity::new(member_id, ActivityKind::InvitationRequested),
        )
        .await;
        info!(member = %member_id, "Invitation requested");
        Ok(invitation)
    }

    pub async fn status(&self, member_id: &str) -> Result<Invitation> {
        InvitationRepository::new(&self.db)
            .get(member_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("no invitation for member {member_id}")))
    }

    pub async fn list_pending(&self, admin: &Member) -> Result<Vec<Invitation>> {
        require_admin(admin)?;
        InvitationRepository::new(&self.db).list_pending().await
    }

    /// Invite the member's email to the workspace, pre-joined to the linked
    /// channels of their groups, and mark the request completed.
    pub async fn complete(&self, admin: &Member, member_id: &str) -> Result<Invitation> {
        require_admin(admin)?;
        let repo = InvitationRepository::new(&self.db);
        if repo.get(member_id).await?.is_none() {
            return Err(TeamLinkError::NotFound(format!(
                "no invitation for member {member_id}"
            )));
        }

        let member = self.member(member_id).await?;
        let email = member
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| TeamLinkError::Validation("member has no email address".to_string()))?;
        let team_id = self
            .team_id
            .as_deref()
            .ok_or_else(|| TeamLinkError::Config("SLACK_TEAM_ID not configured".to_string()))?;

        let channel_ids: Vec<String> = GroupRepository::new(&self.db)
            .groups_for_member(member_id)
            .await?
            .into_iter()
            .filter_map(|g| g.channel_id)
            .collect();

        let token = self.credentials.require_token().await?;
        let invited = self
            .slack
            .invite_to_workspace(&token, team_id, email, &channel_ids)
            .await;
        self.credentials.observe(&invited);
        invited?;

        repo.mark_completed(member_id, &admin.id, Utc::now()).await?;
        record(
            &ActivityRepository::new(&self.db),
            NewActivity::new(&admin.id, ActivityKind::InvitationCompleted)
                .detail(json!({ "member_id": member_id, "channels": channel_ids })),
        )
        .await;
        info!(member = %member_id, admin = %admin.id, channels = channel_ids.len(), "Invitation completed");

        self.status(member_id).await
    }

    async fn member(&self, member_id: &str) -> Result<Member> {
        MemberRepository::new(&self.db)
            .get_member(member_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("member {member_id}")))
    }
}

fn require_admin(member: &Member) -> Result<()> {
    if member.is_admin {
        Ok(())
    } else {
        Err(TeamLinkError::Permission("admin access required".to_string()))
    }
}
