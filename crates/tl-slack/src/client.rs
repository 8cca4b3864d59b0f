use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tl_types::{ExternalProfile, Result, TeamLinkError};
use tracing::{debug, warn};

use crate::api::{FileUpload, InviteOutcome, OutgoingMessage, PostedMessage, RawMessage, SlackApi};
use crate::blocks::{attribution_blocks, attribution_metadata, member_from_metadata};
use crate::errors::{classify, from_status, from_transport};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Retry behavior for HTTP 429 responses.
///
/// Only rate-limit rejections are retried: Slack did not act on the request,
/// so replaying a write cannot duplicate it.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    retry: RetryPolicy,
}

impl SlackClient {
    /// Build a client. Every request is bounded by `timeout`.
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("teamlink"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout.max(Duration::from_millis(1)))
            .build()
            .map_err(|e| TeamLinkError::Config(format!("Failed to build Slack client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn post_json(&self, method: &str, token: &str, body: &Value) -> Result<Value> {
        self.send(method, || {
            self.http
                .post(self.url(method))
                .bearer_auth(token)
                .json(body)
        })
        .await
    }

    async fn get_query(&self, method: &str, token: &str, query: &[(&str, String)]) -> Result<Value> {
        self.send(method, || {
            self.http
                .get(self.url(method))
                .bearer_auth(token)
                .query(query)
        })
        .await
    }

    /// Send a request and decode the JSON envelope without checking `ok`.
    async fn send<F>(&self, method: &str, mut builder: F) -> Result<Value>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = builder()
                .send()
                .await
                .map_err(|e| from_transport(method, &e))?;

            let status = response.status();
            if status.as_u16() == 429 && attempt < self.retry.max_attempts {
                let delay = self.retry.delay(attempt, retry_after(response.headers()));
                warn!(
                    method,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Slack rate limited request, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            if !status.is_success() {
                return Err(from_status(method, status.as_u16()));
            }

            debug!(method, attempt, "Slack request completed");
            return response
                .json::<Value>()
                .await
                .map_err(|e| from_transport(method, &e));
        }
    }

    async fn call(&self, method: &str, token: &str, body: &Value) -> Result<Value> {
        let envelope = self.post_json(method, token, body).await?;
        ensure_ok(method, envelope)
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Error code of an `ok: false` envelope.
fn error_code(envelope: &Value) -> Option<&str> {
    if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    Some(
        envelope
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error"),
    )
}

fn ensure_ok(method: &str, envelope: Value) -> Result<Value> {
    match error_code(&envelope) {
        None => Ok(envelope),
        Some(code) => {
            let needed = envelope.get("needed").and_then(Value::as_str);
            Err(classify(method, code, needed))
        }
    }
}

fn required_str(method: &str, value: &Value, field: &str) -> Result<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TeamLinkError::Platform(format!("Slack {method} response missing {field}")))
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl From<HistoryMessage> for RawMessage {
    fn from(msg: HistoryMessage) -> Self {
        let posted_by_member = msg.metadata.as_ref().and_then(member_from_metadata);
        Self {
            user: msg.user,
            bot_id: msg.bot_id,
            text: msg.text,
            ts: msg.ts,
            subtype: msg.subtype,
            posted_by_member,
        }
    }
}

fn parse_history(envelope: Value) -> Result<Vec<RawMessage>> {
    let messages = envelope
        .get("messages")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let parsed: Vec<HistoryMessage> = serde_json::from_value(messages)?;
    Ok(parsed.into_iter().map(RawMessage::from).collect())
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn create_channel(&self, token: &str, name: &str, is_private: bool) -> Result<String> {
        let method = "conversations.create";
        let body = self
            .call(method, token, &json!({ "name": name, "is_private": is_private }))
            .await?;
        required_str(method, &body["channel"]["id"], "channel.id")
    }

    async fn archive_channel(&self, token: &str, channel: &str) -> Result<()> {
        let method = "conversations.archive";
        let envelope = self
            .post_json(method, token, &json!({ "channel": channel }))
            .await?;
        if error_code(&envelope) == Some("already_archived") {
            debug!(channel, "Channel already archived");
            return Ok(());
        }
        ensure_ok(method, envelope).map(|_| ())
    }

    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> Result<PostedMessage> {
        let method = "chat.postMessage";
        let mut payload = json!({
            "channel": message.channel,
            "text": message.text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(attribution) = &message.attribution {
            payload["blocks"] = attribution_blocks(attribution, &message.text);
            payload["metadata"] = attribution_metadata(attribution);
        }

        let body = self.call(method, token, &payload).await?;
        Ok(PostedMessage {
            channel: non_empty(body.get("channel")).unwrap_or_else(|| message.channel.clone()),
            ts: required_str(method, &body["ts"], "ts")?,
        })
    }

    async fn delete_message(&self, token: &str, channel: &str, ts: &str) -> Result<()> {
        self.call("chat.delete", token, &json!({ "channel": channel, "ts": ts }))
            .await
            .map(|_| ())
    }

    async fn upload_file(&self, token: &str, upload: &FileUpload) -> Result<String> {
        if upload.filename.trim().is_empty() {
            return Err(TeamLinkError::Validation("file name is required".to_string()));
        }
        if upload.bytes.is_empty() {
            return Err(TeamLinkError::Validation("file is empty".to_string()));
        }

        let method = "files.getUploadURLExternal";
        let ticket = self
            .call(
                method,
                token,
                &json!({ "filename": upload.filename, "length": upload.bytes.len() }),
            )
            .await?;
        let upload_url = required_str(method, &ticket["upload_url"], "upload_url")?;
        let file_id = required_str(method, &ticket["file_id"], "file_id")?;

        let response = self
            .http
            .post(&upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(upload.bytes.clone())
            .send()
            .await
            .map_err(|e| from_transport("file upload", &e))?;
        if !response.status().is_success() {
            return Err(from_status("file upload", response.status().as_u16()));
        }

        let mut complete = json!({
            "files": [{ "id": file_id, "title": upload.filename }],
            "channel_id": upload.channel,
        });
        if let Some(comment) = upload
            .initial_comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            complete["initial_comment"] = Value::String(comment.to_string());
        }
        self.call("files.completeUploadExternal", token, &complete)
            .await?;

        Ok(file_id)
    }

    async fn history(&self, token: &str, channel: &str, limit: usize) -> Result<Vec<RawMessage>> {
        let method = "conversations.history";
        let envelope = self
            .get_query(
                method,
                token,
                &[
                    ("channel", channel.to_string()),
                    ("limit", limit.to_string()),
                    ("include_all_metadata", "true".to_string()),
                ],
            )
            .await?;
        parse_history(ensure_ok(method, envelope)?)
    }

    async fn message_at(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
    ) -> Result<Option<RawMessage>> {
        let method = "conversations.history";
        let envelope = self
            .get_query(
                method,
                token,
                &[
                    ("channel", channel.to_string()),
                    ("latest", ts.to_string()),
                    ("inclusive", "true".to_string()),
                    ("limit", "1".to_string()),
                    ("include_all_metadata", "true".to_string()),
                ],
            )
            .await?;
        let messages = parse_history(ensure_ok(method, envelope)?)?;
        Ok(messages.into_iter().find(|m| m.ts == ts))
    }

    async fn user_info(&self, token: &str, user_id: &str) -> Result<ExternalProfile> {
        let method = "users.info";
        let envelope = self
            .get_query(method, token, &[("user", user_id.to_string())])
            .await?;
        let body = ensure_ok(method, envelope)?;
        let user = &body["user"];
        let profile = &user["profile"];

        let real_name = non_empty(profile.get("real_name")).or_else(|| non_empty(user.get("real_name")));
        let display_name = non_empty(profile.get("display_name"))
            .or_else(|| real_name.clone())
            .or_else(|| non_empty(user.get("name")))
            .unwrap_or_else(|| user_id.to_string());
        let avatar_url = non_empty(profile.get("image_72"))
            .or_else(|| non_empty(profile.get("image_48")));

        Ok(ExternalProfile {
            user_id: user_id.to_string(),
            display_name,
            real_name,
            avatar_url,
        })
    }

    async fn invite_to_channel(
        &self,
        token: &str,
        channel: &str,
        user_id: &str,
    ) -> Result<InviteOutcome> {
        let method = "conversations.invite";
        let envelope = self
            .post_json(method, token, &json!({ "channel": channel, "users": user_id }))
            .await?;
        match error_code(&envelope) {
            Some("already_in_channel") => Ok(InviteOutcome::AlreadyMember),
            _ => ensure_ok(method, envelope).map(|_| InviteOutcome::Added),
        }
    }

    async fn invite_to_workspace(
        &self,
        token: &str,
        team_id: &str,
        email: &str,
        channel_ids: &[String],
    ) -> Result<()> {
        let method = "admin.users.invite";
        let envelope = self
            .post_json(
                method,
                token,
                &json!({
                    "team_id": team_id,
                    "email": email,
                    "channel_ids": channel_ids.join(","),
                }),
            )
            .await?;
        match error_code(&envelope) {
            Some(code @ ("already_invited" | "already_in_team")) => {
                debug!(email, code, "Workspace invitation already in place");
                Ok(())
            }
            _ => ensure_ok(method, envelope).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> SlackClient {
        SlackClient::new(base_url, Duration::from_millis(500))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            })
    }

    #[tokio::test]
    async fn create_channel_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.create"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(body_partial_json(json!({"name": "team-x", "is_private": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "channel": {"id": "C123"}})),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let id = client
            .create_channel("xoxb-test", "team-x", true)
            .await
            .unwrap();
        assert_eq!(id, "C123");
    }

    #[tokio::test]
    async fn name_taken_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.create"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "name_taken"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .create_channel("t", "team-x", true)
            .await
            .unwrap_err();
        assert!(matches!(err, TeamLinkError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_auth_is_authentication() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "invalid_auth"})),
            )
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .post_message("bad", &OutgoingMessage::bot("C1", "hi"))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn retries_once_on_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "channel": "C1", "ts": "1700000000.000100"})),
            )
            .mount(&server)
            .await;

        let posted = test_client(&server.uri())
            .post_message("t", &OutgoingMessage::bot("C1", "hi"))
            .await
            .unwrap();
        assert_eq!(posted.ts, "1700000000.000100");
    }

    #[tokio::test]
    async fn persistent_429_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri())
            .user_info("t", "U1")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "messages": []}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let client = SlackClient::new(&server.uri(), Duration::from_millis(50)).unwrap();
        let err = client.history("t", "C1", 5).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn history_parses_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .and(query_param("channel", "C1"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {
                        "bot_id": "B1",
                        "text": "from the app",
                        "ts": "2.0",
                        "metadata": {
                            "event_type": "teamlink_post",
                            "event_payload": {"member_id": "m1"}
                        }
                    },
                    {"user": "U1", "text": "hello", "ts": "1.0"},
                    {"user": "U2", "ts": "0.5", "subtype": "channel_join"}
                ]
            })))
            .mount(&server)
            .await;

        let messages = test_client(&server.uri())
            .history("t", "C1", 5)
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].posted_by_member.as_deref(), Some("m1"));
        assert_eq!(messages[0].sender_id(), "B1");
        assert_eq!(messages[1].user.as_deref(), Some("U1"));
        assert_eq!(messages[2].text, "");
    }

    #[tokio::test]
    async fn archive_tolerates_already_archived() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.archive"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "already_archived"})),
            )
            .mount(&server)
            .await;

        test_client(&server.uri())
            .archive_channel("t", "C1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn invite_already_in_channel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.invite"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "already_in_channel"})),
            )
            .mount(&server)
            .await;

        let outcome = test_client(&server.uri())
            .invite_to_channel("t", "C1", "U1")
            .await
            .unwrap();
        assert_eq!(outcome, InviteOutcome::AlreadyMember);
    }

    #[tokio::test]
    async fn user_info_prefers_display_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user": {
                    "id": "U1",
                    "name": "alice",
                    "profile": {
                        "display_name": "",
                        "real_name": "Alice Doe",
                        "image_72": "https://img/alice.png"
                    }
                }
            })))
            .mount(&server)
            .await;

        let profile = test_client(&server.uri())
            .user_info("t", "U1")
            .await
            .unwrap();
        assert_eq!(profile.display_name, "Alice Doe");
        assert_eq!(profile.avatar_url.as_deref(), Some("https://img/alice.png"));
    }

    #[tokio::test]
    async fn upload_runs_three_steps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files.getUploadURLExternal"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "upload_url": format!("{}/upload/F1", server.uri()),
                "file_id": "F1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/F1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/files.completeUploadExternal"))
            .and(body_partial_json(json!({
                "channel_id": "C1",
                "initial_comment": "shared by Alice"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let file_id = test_client(&server.uri())
            .upload_file(
                "t",
                &FileUpload {
                    channel: "C1".to_string(),
                    filename: "notes.txt".to_string(),
                    bytes: b"hello".to_vec(),
                    initial_comment: Some("shared by Alice".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(file_id, "F1");
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
        };
        assert_eq!(policy.delay(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay(2, None), Duration::from_millis(150));
        assert_eq!(
            policy.delay(1, Some(Duration::from_secs(30))),
            Duration::from_millis(150)
        );
    }
}
