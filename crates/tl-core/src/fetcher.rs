use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use lru::LruCache;
use tl_db::{Database, MemberRepository};
use tl_slack::{RawMessage, SlackApi};
use tl_types::{CachedMessage, ExternalProfile, Member, Result};
use tracing::{debug, warn};

use crate::credentials::CredentialCache;

/// Concurrent `users.info` lookups per fetch.
const PROFILE_LOOKUP_CONCURRENCY: usize = 4;

pub struct MessageFetcher {
    db: Arc<Database>,
    slack: Arc<dyn SlackApi>,
    credentials: Arc<CredentialCache>,
    profiles: Mutex<LruCache<String, ExternalProfile>>,
}

impl MessageFetcher {
    pub fn new(
        db: Arc<Database>,
        slack: Arc<dyn SlackApi>,
        credentials: Arc<CredentialCache>,
        profile_cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(profile_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            db,
            slack,
            credentials,
            profiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Most recent `limit` messages of a channel, newest first.
    ///
    /// Messages without text are dropped. Senders are resolved to members
    /// where possible and to a platform profile otherwise; a failed profile
    /// lookup leaves that message without one.
    pub async fn fetch_recent(&self, channel_id: &str, limit: usize) -> Result<Vec<CachedMessage>> {
        let token = self.credentials.require_token().await?;

        let history = self.slack.history(&token, channel_id, limit).await;
        self.credentials.observe(&history);
        let raw: Vec<RawMessage> = history?
            .into_iter()
            .filter(|m| !m.text.trim().is_empty())
            .collect();

        let (by_id, by_external) = self.resolve_members(&raw).await;

        let unresolved: Vec<String> = unique(raw.iter().filter_map(|m| {
            let resolved = member_for(m, &by_id, &by_external).is_some();
            match (&m.user, resolved) {
                (Some(user), false) => Some(user.clone()),
                _ => None,
            }
        }));
        let profiles = self.lookup_profiles(&token, unresolved).await;

        let messages = raw
            .into_iter()
            .map(|m| {
                let member = member_for(&m, &by_id, &by_external).map(Member::as_ref_snapshot);
                let profile = match &member {
                    Some(_) => None,
                    None => m.user.as_ref().and_then(|u| profiles.get(u).cloned()),
                };
                CachedMessage {
                    sender_id: m.sender_id().to_string(),
                    text: m.text,
                    ts: m.ts,
                    member,
                    profile,
                }
            })
            .collect::<Vec<_>>();

        debug!(channel = %channel_id, count = messages.len(), "Fetched recent messages");
        Ok(messages)
    }

    /// Batch-resolve members by attributed member id and by external id.
    async fn resolve_members(
        &self,
        raw: &[RawMessage],
    ) -> (HashMap<String, Member>, HashMap<String, Member>) {
        let repo = MemberRepository::new(&self.db);

        let attributed = unique(raw.iter().filter_map(|m| m.posted_by_member.clone()));
        let external = unique(
            raw.iter()
                .filter(|m| m.posted_by_member.is_none())
                .filter_map(|m| m.user.clone()),
        );

        let by_id = match repo.get_many(&attributed).await {
            Ok(members) => members.into_iter().map(|m| (m.id.clone(), m)).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to resolve attributed senders");
                HashMap::new()
            }
        };
        let by_external = match repo.get_by_external_ids(&external).await {
            Ok(members) => members
                .into_iter()
                .filter_map(|m| m.external_user_id().map(str::to_string).map(|ext| (ext, m)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to resolve senders by external id");
                HashMap::new()
            }
        };

        (by_id, by_external)
    }

    async fn lookup_profiles(
        &self,
        token: &str,
        user_ids: Vec<String>,
    ) -> HashMap<String, ExternalProfile> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let mut cache = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
            for id in user_ids {
                match cache.get(&id) {
                    Some(profile) => {
                        found.insert(id, profile.clone());
                    }
                    None => missing.push(id),
                }
            }
        }
        if missing.is_empty() {
            return found;
        }

        let results: Vec<(String, Result<ExternalProfile>)> = stream::iter(missing)
            .map(|id| async move {
                let result = self.slack.user_info(token, &id).await;
                (id, result)
            })
            .buffer_unordered(PROFILE_LOOKUP_CONCURRENCY)
            .collect()
            .await;

        let mut cache = self.profiles.lock().unwrap_or_else(|e| e.into_inner());
        for (id, result) in results {
            self.credentials.observe(&result);
            match result {
                Ok(profile) => {
                    cache.put(id.clone(), profile.clone());
                    found.insert(id, profile);
                }
                Err(e) => debug!(user = %id, error = %e, "Profile lookup failed"),
            }
        }
        found
    }
}

fn member_for<'a>(
    message: &RawMessage,
    by_id: &'a HashMap<String, Member>,
    by_external: &'a HashMap<String, Member>,
) -> Option<&'a Member> {
    if let Some(member_id) = &message.posted_by_member {
        if let Some(member) = by_id.get(member_id) {
            return Some(member);
        }
    }
    message.user.as_ref().and_then(|u| by_external.get(u))
}

/// Distinct values, first occurrence order.
fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use tl_types::TeamLinkError;

    fn raw(user: &str, text: &str, ts: &str) -> RawMessage {
        RawMessage {
            user: Some(user.to_string()),
            text: text.to_string(),
            ts: ts.to_string(),
            ..Default::default()
        }
    }

    fn profile(user: &str, name: &str) -> ExternalProfile {
        ExternalProfile {
            user_id: user.to_string(),
            display_name: name.to_string(),
            real_name: None,
            avatar_url: None,
        }
    }

    fn fetcher(fx: &Fixture) -> MessageFetcher {
        MessageFetcher::new(fx.db.clone(), fx.slack_api(), fx.credentials.clone(), 100)
    }

    #[tokio::test]
    async fn resolves_members_and_profiles_in_order() {
        let fx = Fixture::new().await;
        fx.member("m1", "Alice", Some("U1")).await;
        fx.slack.add_profile(profile("U2", "bob-slack"));
        fx.slack.set_history(
            "C1",
            vec![
                raw("U2", "third", "3.0"),
                raw("U1", "second", "2.0"),
                raw("U3", "first", "1.0"),
            ],
        );

        let messages = fetcher(&fx).fetch_recent("C1", 5).await.unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);

        assert_eq!(messages[0].profile.as_ref().unwrap().display_name, "bob-slack");
        assert!(messages[0].member.is_none());
        assert_eq!(messages[1].member.as_ref().unwrap().id, "m1");
        assert!(messages[1].profile.is_none());
        // U3 has no profile: the lookup failure leaves it empty.
        assert!(messages[2].member.is_none());
        assert!(messages[2].profile.is_none());
    }

    #[tokio::test]
    async fn drops_empty_text() {
        let fx = Fixture::new().await;
        fx.slack.set_history(
            "C1",
            vec![raw("U1", "", "3.0"), raw("U1", "   ", "2.0"), raw("U1", "hi", "1.0")],
        );

        let messages = fetcher(&fx).fetch_recent("C1", 5).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].ts, "1.0");
    }

    #[tokio::test]
    async fn attributed_posts_resolve_to_member() {
        let fx = Fixture::new().await;
        fx.member("m7", "Grace", None).await;
        fx.slack.set_history(
            "C1",
            vec![RawMessage {
                bot_id: Some("B1".to_string()),
                text: "posted via app".to_string(),
                ts: "1.0".to_string(),
                posted_by_member: Some("m7".to_string()),
                ..Default::default()
            }],
        );

        let messages = fetcher(&fx).fetch_recent("C1", 5).await.unwrap();
        assert_eq!(messages[0].member.as_ref().unwrap().display_name, "Grace");
        assert_eq!(messages[0].sender_id, "B1");
        assert_eq!(fx.slack.call_count("users.info"), 0);
    }

    #[tokio::test]
    async fn profiles_are_looked_up_once_per_sender() {
        let fx = Fixture::new().await;
        fx.slack.add_profile(profile("U2", "bob"));
        fx.slack.set_history(
            "C1",
            vec![raw("U2", "a", "2.0"), raw("U2", "b", "1.0")],
        );

        let fetcher = fetcher(&fx);
        fetcher.fetch_recent("C1", 5).await.unwrap();
        assert_eq!(fx.slack.call_count("users.info"), 1);

        // Served from the profile cache the second time.
        fetcher.fetch_recent("C1", 5).await.unwrap();
        assert_eq!(fx.slack.call_count("users.info"), 1);
    }

    #[tokio::test]
    async fn missing_token_is_configuration_error() {
        let fx = Fixture::without_token().await;
        let err = fetcher(&fx).fetch_recent("C1", 5).await.unwrap_err();
        assert!(matches!(err, TeamLinkError::Config(_)));
        assert!(fx.slack.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_token_invalidates_cache() {
        let fx = Fixture::new().await;
        fx.slack.fail("conversations.history", "invalid_auth");
        let fetcher = fetcher(&fx);

        let err = fetcher.fetch_recent("C1", 5).await.unwrap_err();
        assert!(err.is_authentication());

        // Rotate the stored token; the next call must pick it up.
        tl_db::SettingsRepository::new(&fx.db)
            .set(tl_db::BOT_TOKEN_KEY, "xoxb-rotated")
            .await
            .unwrap();
        fx.slack.clear_failure("conversations.history");
        fx.slack.require_token("xoxb-rotated");
        fetcher.fetch_recent("C1", 5).await.unwrap();
    }

    #[tokio::test]
    async fn respects_limit() {
        let fx = Fixture::new().await;
        let history = (0..10)
            .rev()
            .map(|i| raw("U1", &format!("m{i}"), &format!("{i}.0")))
            .collect();
        fx.slack.set_history("C1", history);

        let messages = fetcher(&fx).fetch_recent("C1", 5).await.unwrap();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].text, "m9");
    }
}
