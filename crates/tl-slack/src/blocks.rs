use serde_json::{json, Value};

use crate::api::Attribution;

/// Metadata event type stamped on attributed posts.
pub const POST_EVENT_TYPE: &str = "teamlink_post";

/// Context line with the member's avatar and name, then the message body.
pub fn attribution_blocks(attribution: &Attribution, text: &str) -> Value {
    let mut context = Vec::new();
    if let Some(url) = attribution.avatar_url.as_deref().filter(|u| !u.is_empty()) {
        context.push(json!({
            "type": "image",
            "image_url": url,
            "alt_text": attribution.display_name,
        }));
    }
    context.push(json!({
        "type": "mrkdwn",
        "text": format!("*{}*", attribution.display_name),
    }));

    json!([
        { "type": "context", "elements": context },
        { "type": "section", "text": { "type": "mrkdwn", "text": text } },
    ])
}

/// Message metadata recording which member a post belongs to.
pub fn attribution_metadata(attribution: &Attribution) -> Value {
    json!({
        "event_type": POST_EVENT_TYPE,
        "event_payload": { "member_id": attribution.member_id },
    })
}

/// Read the member id back out of a history entry's `metadata`.
pub fn member_from_metadata(metadata: &Value) -> Option<String> {
    if metadata.get("event_type").and_then(Value::as_str) != Some(POST_EVENT_TYPE) {
        return None;
    }
    metadata
        .get("event_payload")
        .and_then(|p| p.get("member_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
