use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tl_db::{Database, GroupRepository, MemberRepository, SettingsRepository, BOT_TOKEN_KEY};
use tl_slack::{MockSlack, SlackApi};
use tl_types::{Group, Member};

use crate::credentials::{CredentialCache, SettingsCredentialSource};

pub(crate) const TOKEN: &str = "xoxb-test";

pub(crate) struct Fixture {
    pub db: Arc<Database>,
    pub slack: Arc<MockSlack>,
    pub credentials: Arc<CredentialCache>,
}

impl Fixture {
    /// Fresh database with a configured bot token and a fake workspace.
    pub async fn new() -> Self {
        let fixture = Self::without_token().await;
        SettingsRepository::new(&fixture.db)
            .set(BOT_TOKEN_KEY, TOKEN)
            .await
            .unwrap();
        fixture.slack.require_token(TOKEN);
        fixture
    }

    pub async fn without_token() -> Self {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.initialize().await.unwrap();
        let credentials = Arc::new(CredentialCache::new(
            Arc::new(SettingsCredentialSource::new(db.clone())),
            Duration::from_secs(3600),
        ));
        Self {
            db,
            slack: Arc::new(MockSlack::new()),
            credentials,
        }
    }

    pub fn slack_api(&self) -> Arc<dyn SlackApi> {
        self.slack.clone()
    }

    pub async fn group(&self, id: &str, name: &str, channel: Option<&str>) -> Group {
        let mut group = Group::new(id, name);
        group.channel_id = channel.map(str::to_string);
        GroupRepository::new(&self.db)
            .save_group(&group)
            .await
            .unwrap();
        if let Some(channel) = channel {
            self.slack.add_channel(channel, name);
        }
        group
    }

    /// Save a member, optionally linked to external user `external`.
    pub async fn member(&self, id: &str, name: &str, external: Option<&str>) -> Member {
        let repo = MemberRepository::new(&self.db);
        let mut member = Member::new(id, name);
        member.email = Some(format!("{id}@example.com"));
        repo.save_member(&member).await.unwrap();
        if let Some(external) = external {
            repo.link_identity(id, external, "xoxp-user", Utc::now())
                .await
                .unwrap();
        }
        repo.get_member(id).await.unwrap().unwrap()
    }

    pub async fn join(&self, group_id: &str, member_id: &str) {
        GroupRepository::new(&self.db)
            .add_member(group_id, member_id)
            .await
            .unwrap();
    }
}
