use std::sync::Arc;

use tl_config::Config;
use tl_db::Database;
use tl_slack::{SlackApi, SlackClient};
use tl_types::Result;

use crate::broadcast::{BroadcastHub, LocalTransport, Transport};
use crate::cache_store::CacheStore;
use crate::credentials::{CredentialCache, SettingsCredentialSource};
use crate::fetcher::MessageFetcher;
use crate::identity::IdentityService;
use crate::invitations::InvitationService;
use crate::lifecycle::ChannelLifecycle;
use crate::membership::MembershipSynchronizer;
use crate::messages::MessageService;

/// Every service, built once per process.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub slack: Arc<dyn SlackApi>,
    pub credentials: Arc<CredentialCache>,
    pub cache: Arc<CacheStore>,
    pub hub: Arc<BroadcastHub>,
    pub sync: Arc<MembershipSynchronizer>,
    pub lifecycle: Arc<ChannelLifecycle>,
    pub messages: Arc<MessageService>,
    pub identity: Arc<IdentityService>,
    pub invitations: Arc<InvitationService>,
}

impl Services {
    pub fn new(
        config: &Config,
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let credentials = Arc::new(CredentialCache::new(
            Arc::new(SettingsCredentialSource::new(db.clone())),
            config.bot_token_ttl(),
        ));
        let cache = Arc::new(CacheStore::new(
            db.clone(),
            config.cache_max_messages,
            config.cache_stale_after(),
        ));
        let hub = Arc::new(BroadcastHub::new(transport));
        let fetcher = Arc::new(MessageFetcher::new(
            db.clone(),
            slack.clone(),
            credentials.clone(),
            config.profile_cache_size,
        ));
        let sync = Arc::new(MembershipSynchronizer::new(
            db.clone(),
            slack.clone(),
            credentials.clone(),
            config.sync_max_concurrent,
        ));
        let lifecycle = Arc::new(ChannelLifecycle::new(
            db.clone(),
            slack.clone(),
            credentials.clone(),
            sync.clone(),
            cache.clone(),
            config.app_base_url.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            db.clone(),
            slack.clone(),
            credentials.clone(),
            fetcher,
            cache.clone(),
            hub.clone(),
        ));
        let identity = Arc::new(IdentityService::new(db.clone(), sync.clone()));
        let invitations = Arc::new(InvitationService::new(
            db.clone(),
            slack.clone(),
            credentials.clone(),
            config.slack_team_id.clone(),
        ));

        Self {
            db,
            slack,
            credentials,
            cache,
            hub,
            sync,
            lifecycle,
            messages,
            identity,
            invitations,
        }
    }

    /// Production wiring: HTTP Slack client and in-process transport.
    pub fn from_config(config: &Config, db: Arc<Database>) -> Result<Self> {
        let slack = SlackClient::new(&config.slack_api_base, config.slack_request_timeout())?;
        Ok(Self::new(
            config,
            db,
            Arc::new(slack),
            Arc::new(LocalTransport::new()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn wired_services_share_state() {
        let fx = Fixture::new().await;
        fx.group("g1", "Team", Some("C1")).await;
        let member = fx.member("m1", "Alice", Some("U1")).await;
        fx.join("g1", "m1").await;

        let services = Services::new(
            &Config::default(),
            fx.db.clone(),
            fx.slack_api(),
            Arc::new(LocalTransport::new()),
        );

        services.messages.post(&member, "g1", "hi").await.unwrap();
        assert!(services.cache.read("C1").await.is_some());
        assert_eq!(services.hub.active_groups(), 0);
    }

    #[tokio::test]
    async fn from_config_builds_http_client() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.initialize().await.unwrap();
        let services = Services::from_config(&Config::default(), db).unwrap();
        assert_eq!(services.credentials.get_token().await.unwrap(), None);
    }
}
