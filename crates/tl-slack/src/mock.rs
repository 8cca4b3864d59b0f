use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tl_types::{ExternalProfile, Result, TeamLinkError};

use crate::api::{FileUpload, InviteOutcome, OutgoingMessage, PostedMessage, RawMessage, SlackApi};
use crate::errors::classify;

#[derive(Default)]
struct MockState {
    next_id: u64,
    valid_token: Option<String>,
    channels: HashMap<String, String>,
    archived: HashSet<String>,
    histories: HashMap<String, Vec<RawMessage>>,
    profiles: HashMap<String, ExternalProfile>,
    members: HashMap<String, HashSet<String>>,
    posted: Vec<OutgoingMessage>,
    uploads: Vec<FileUpload>,
    workspace_invites: Vec<(String, Vec<String>)>,
    op_failures: HashMap<String, String>,
    user_failures: HashMap<String, String>,
    calls: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    invite_delay: Option<Duration>,
}

/// Fake Slack workspace.
#[derive(Default)]
pub struct MockSlack {
    state: Mutex<MockState>,
}

impl MockSlack {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Reject every token except `token` with `invalid_auth`.
    pub fn require_token(&self, token: &str) {
        self.with_state(|s| s.valid_token = Some(token.to_string()));
    }

    /// Make operation `op` (Slack method name) fail with `code`.
    pub fn fail(&self, op: &str, code: &str) {
        self.with_state(|s| {
            s.op_failures.insert(op.to_string(), code.to_string());
        });
    }

    pub fn clear_failure(&self, op: &str) {
        self.with_state(|s| {
            s.op_failures.remove(op);
        });
    }

    /// Make per-user operations for `user_id` fail with `code`.
    pub fn fail_user(&self, user_id: &str, code: &str) {
        self.with_state(|s| {
            s.user_failures
                .insert(user_id.to_string(), code.to_string());
        });
    }

    /// Hold each channel invite for `delay` so concurrency can be observed.
    pub fn set_invite_delay(&self, delay: Duration) {
        self.with_state(|s| s.invite_delay = Some(delay));
    }

    /// Replace a channel's history. `messages` are most recent first.
    pub fn set_history(&self, channel: &str, messages: Vec<RawMessage>) {
        self.with_state(|s| {
            s.histories.insert(channel.to_string(), messages);
        });
    }

    pub fn add_profile(&self, profile: ExternalProfile) {
        self.with_state(|s| {
            s.profiles.insert(profile.user_id.clone(), profile);
        });
    }

    /// Register an existing channel (e.g. one created out of band).
    pub fn add_channel(&self, channel_id: &str, name: &str) {
        self.with_state(|s| {
            s.channels.insert(name.to_string(), channel_id.to_string());
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| c.as_str() == op).count())
    }

    pub fn posted(&self) -> Vec<OutgoingMessage> {
        self.with_state(|s| s.posted.clone())
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.with_state(|s| s.uploads.clone())
    }

    pub fn channel_members(&self, channel: &str) -> HashSet<String> {
        self.with_state(|s| s.members.get(channel).cloned().unwrap_or_default())
    }

    pub fn is_archived(&self, channel: &str) -> bool {
        self.with_state(|s| s.archived.contains(channel))
    }

    pub fn workspace_invites(&self) -> Vec<(String, Vec<String>)> {
        self.with_state(|s| s.workspace_invites.clone())
    }

    pub fn max_in_flight(&self) -> usize {
        self.with_state(|s| s.max_in_flight)
    }

    /// Record the call and apply token and failure injection.
    fn enter(&self, op: &str, token: &str, user: Option<&str>) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(op.to_string());
            if let Some(valid) = &s.valid_token {
                if valid != token {
                    return Err(classify(op, "invalid_auth", None));
                }
            }
            if let Some(code) = s.op_failures.get(op) {
                return Err(classify(op, code, None));
            }
            if let Some(code) = user.and_then(|u| s.user_failures.get(u)) {
                return Err(classify(op, code, None));
            }
            Ok(())
        })
    }

    fn next_id(state: &mut MockState) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl SlackApi for MockSlack {
    async fn create_channel(&self, token: &str, name: &str, _is_private: bool) -> Result<String> {
        self.enter("conversations.create", token, None)?;
        self.with_state(|s| {
            if s.channels.contains_key(name) {
                return Err(classify("conversations.create", "name_taken", None));
            }
            let id = format!("C{:04}", Self::next_id(s));
            s.channels.insert(name.to_string(), id.clone());
            Ok(id)
        })
    }

    async fn archive_channel(&self, token: &str, channel: &str) -> Result<()> {
        self.enter("conversations.archive", token, None)?;
        self.with_state(|s| {
            if !s.channels.values().any(|id| id == channel) {
                return Err(classify("conversations.archive", "channel_not_found", None));
            }
            s.archived.insert(channel.to_string());
            Ok(())
        })
    }

    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> Result<PostedMessage> {
        self.enter("chat.postMessage", token, None)?;
        self.with_state(|s| {
            if s.archived.contains(&message.channel) {
                return Err(classify("chat.postMessage", "is_archived", None));
            }
            let ts = format!("1700000000.{:06}", Self::next_id(s));
            let raw = RawMessage {
                user: None,
                bot_id: Some("BTEAMLINK".to_string()),
                text: message.text.clone(),
                ts: ts.clone(),
                subtype: Some("bot_message".to_string()),
                posted_by_member: message.attribution.as_ref().map(|a| a.member_id.clone()),
            };
            s.histories
                .entry(message.channel.clone())
                .or_default()
                .insert(0, raw);
            s.posted.push(message.clone());
            Ok(PostedMessage {
                channel: message.channel.clone(),
                ts,
            })
        })
    }

    async fn delete_message(&self, token: &str, channel: &str, ts: &str) -> Result<()> {
        self.enter("chat.delete", token, None)?;
        self.with_state(|s| {
            let history = s.histories.entry(channel.to_string()).or_default();
            let before = history.len();
            history.retain(|m| m.ts != ts);
            if history.len() == before {
                return Err(classify("chat.delete", "message_not_found", None));
            }
            Ok(())
        })
    }

    async fn upload_file(&self, token: &str, upload: &FileUpload) -> Result<String> {
        self.enter("files.completeUploadExternal", token, None)?;
        if upload.bytes.is_empty() {
            return Err(TeamLinkError::Validation("file is empty".to_string()));
        }
        self.with_state(|s| {
            let id = format!("F{:04}", Self::next_id(s));
            s.uploads.push(upload.clone());
            Ok(id)
        })
    }

    async fn history(&self, token: &str, channel: &str, limit: usize) -> Result<Vec<RawMessage>> {
        self.enter("conversations.history", token, None)?;
        self.with_state(|s| {
            Ok(s.histories
                .get(channel)
                .map(|h| h.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn message_at(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
    ) -> Result<Option<RawMessage>> {
        self.enter("conversations.history", token, None)?;
        self.with_state(|s| {
            Ok(s.histories
                .get(channel)
                .and_then(|h| h.iter().find(|m| m.ts == ts).cloned()))
        })
    }

    async fn user_info(&self, token: &str, user_id: &str) -> Result<ExternalProfile> {
        self.enter("users.info", token, Some(user_id))?;
        self.with_state(|s| {
            s.profiles
                .get(user_id)
                .cloned()
                .ok_or_else(|| classify("users.info", "user_not_found", None))
        })
    }

    async fn invite_to_channel(
        &self,
        token: &str,
        channel: &str,
        user_id: &str,
    ) -> Result<InviteOutcome> {
        self.enter("conversations.invite", token, Some(user_id))?;

        let delay = self.with_state(|s| {
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            s.invite_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|s| {
            s.in_flight -= 1;
            let added = s
                .members
                .entry(channel.to_string())
                .or_default()
                .insert(user_id.to_string());
            Ok(if added {
                InviteOutcome::Added
            } else {
                InviteOutcome::AlreadyMember
            })
        })
    }

    async fn invite_to_workspace(
        &self,
        token: &str,
        _team_id: &str,
        email: &str,
        channel_ids: &[String],
    ) -> Result<()> {
        self.enter("admin.users.invite", token, None)?;
        self.with_state(|s| {
            s.workspace_invites
                .push((email.to_string(), channel_ids.to_vec()));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_then_history() {
        let slack = MockSlack::new();
        let channel = slack.create_channel("t", "team-x", true).await.unwrap();

        slack
            .post_message("t", &OutgoingMessage::bot(&channel, "one"))
            .await
            .unwrap();
        let second = slack
            .post_message("t", &OutgoingMessage::bot(&channel, "two"))
            .await
            .unwrap();

        let history = slack.history("t", &channel, 5).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "two");

        slack
            .delete_message("t", &channel, &second.ts)
            .await
            .unwrap();
        assert_eq!(slack.history("t", &channel, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_classified() {
        let slack = MockSlack::new();
        slack.require_token("good");
        let err = slack.history("bad", "C1", 5).await.unwrap_err();
        assert!(err.is_authentication());

        slack.fail_user("U9", "user_not_found");
        let err = slack
            .invite_to_channel("good", "C1", "U9")
            .await
            .unwrap_err();
        assert!(matches!(err, TeamLinkError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_channel_name_conflicts() {
        let slack = MockSlack::new();
        slack.create_channel("t", "dup", true).await.unwrap();
        let err = slack.create_channel("t", "dup", true).await.unwrap_err();
        assert!(matches!(err, TeamLinkError::Conflict(_)));
    }
}
