use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tl_db::{ActivityRepository, Database, MemberRepository};
use tl_types::{ActivityKind, Member, NewActivity, Result, TeamLinkError};
use tracing::{info, warn};

use crate::membership::{record, MembershipSynchronizer};

pub struct IdentityService {
    db: Arc<Database>,
    sync: Arc<MembershipSynchronizer>,
}

impl IdentityService {
    pub fn new(db: Arc<Database>, sync: Arc<MembershipSynchronizer>) -> Self {
        Self { db, sync }
    }

    /// Store a linked identity and add the member to their groups' channels.
    ///
    /// The channel pass is best effort; the link stands even when it fails.
    pub async fn link(
        &self,
        member_id: &str,
        external_user_id: &str,
        access_token: &str,
    ) -> Result<Member> {
        let external_user_id = external_user_id.trim();
        if external_user_id.is_empty() {
            return Err(TeamLinkError::Validation("external user id is required".to_string()));
        }
        if access_token.trim().is_empty() {
            return Err(TeamLinkError::Validation("access token is required".to_string()));
        }

        let members = MemberRepository::new(&self.db);
        if !members
            .link_identity(member_id, external_user_id, access_token, Utc::now())
            .await?
        {
            return Err(TeamLinkError::NotFound(format!("member {member_id}")));
        }

        record(
            &ActivityRepository::new(&self.db),
            NewActivity::new(member_id, ActivityKind::IdentityLinked)
                .detail(json!({ "external_user_id": external_user_id })),
        )
        .await;
        info!(member = %member_id, external = %external_user_id, "Identity linked");

        match self.sync.sync_member(member_id, member_id).await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(member = %member_id, failed = report.failed.len(), "Some channels could not be joined");
            }
            Ok(_) => {}
            Err(e) => warn!(member = %member_id, error = %e, "Channel sync after linking failed"),
        }

        members
            .get_member(member_id)
            .await?
            .ok_or_else(|| TeamLinkError::NotFound(format!("member {member_id}")))
    }

    /// Remove the member's linked identity. Returns false if none was set.
    pub async fn unlink(&self, member_id: &str) -> Result<bool> {
        let cleared = MemberRepository::new(&self.db)
            .clear_identity(member_id)
            .await?;
        if cleared {
            record(
                &ActivityRepository::new(&self.db),
                NewActivity::new(member_id, ActivityKind::IdentityUnlinked),
            )
            .await;
            info!(member = %member_id, "Identity unlinked");
        }
        Ok(cleared)
    }
}
