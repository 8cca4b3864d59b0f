use tl_types::TeamLinkError;

/// Translate the `error` field of an `ok: false` response.
///
/// `needed` is the scope Slack reports alongside `missing_scope`.
pub fn classify(method: &str, code: &str, needed: Option<&str>) -> TeamLinkError {
    match code {
        "not_authed" | "invalid_auth" | "account_inactive" | "token_revoked"
        | "token_expired" => {
            TeamLinkError::Authentication(format!("Slack rejected the bot token ({code})"))
        }
        "missing_scope" => TeamLinkError::Permission(match needed {
            Some(scope) => format!("Slack app is missing the `{scope}` scope"),
            None => "Slack app is missing a required scope".to_string(),
        }),
        "not_in_channel" => {
            TeamLinkError::Permission("bot must be invited to the channel".to_string())
        }
        "cant_delete_message" => {
            TeamLinkError::Permission("cannot delete this message".to_string())
        }
        "channel_not_found" => TeamLinkError::NotFound("channel not found".to_string()),
        "message_not_found" => TeamLinkError::NotFound("message not found".to_string()),
        "user_not_found" => TeamLinkError::NotFound("user not found".to_string()),
        "name_taken" => TeamLinkError::Conflict("channel name already taken".to_string()),
        "ratelimited" | "rate_limited" => {
            TeamLinkError::Transient(format!("Slack rate limited {method}"))
        }
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            TeamLinkError::Transient(format!("Slack {method} failed: {code}"))
        }
        other => TeamLinkError::Platform(format!("Slack {method} failed: {other}")),
    }
}

/// Translate a non-success HTTP status.
pub fn from_status(method: &str, status: u16) -> TeamLinkError {
    match status {
        429 => TeamLinkError::Transient(format!("Slack rate limited {method}")),
        500..=599 => TeamLinkError::Transient(format!("Slack {method} returned HTTP {status}")),
        401 => TeamLinkError::Authentication(format!("Slack {method} returned HTTP 401")),
        403 => TeamLinkError::Permission(format!("Slack {method} returned HTTP 403")),
        404 => TeamLinkError::NotFound(format!("Slack {method} returned HTTP 404")),
        _ => TeamLinkError::Platform(format!("Slack {method} returned HTTP {status}")),
    }
}

/// Translate a transport-level failure.
pub fn from_transport(method: &str, error: &reqwest::Error) -> TeamLinkError {
    if error.is_timeout() {
        TeamLinkError::Transient(format!("Slack {method} timed out"))
    } else if error.is_connect() || error.is_request() {
        TeamLinkError::Transient(format!("Slack {method} request failed: {error}"))
    } else if error.is_decode() {
        TeamLinkError::Platform(format!("Slack {method} returned an unreadable body: {error}"))
    } else {
        TeamLinkError::Platform(format!("Slack {method} failed: {error}"))
    }
}
