use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tl_types::TeamLinkError;
use tracing::{error, warn};

/// HTTP rendering of a [`TeamLinkError`].
#[derive(Debug)]
pub struct ApiError(pub TeamLinkError);

impl From<TeamLinkError> for ApiError {
    fn from(e: TeamLinkError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TeamLinkError::Authentication(_) | TeamLinkError::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            TeamLinkError::Permission(_) => StatusCode::FORBIDDEN,
            TeamLinkError::NotFound(_) => StatusCode::NOT_FOUND,
            TeamLinkError::Validation(_) => StatusCode::BAD_REQUEST,
            TeamLinkError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            TeamLinkError::Config(_) => "not_configured",
            TeamLinkError::Authentication(_) => "authentication_failed",
            TeamLinkError::Unauthenticated => "unauthenticated",
            TeamLinkError::Permission(_) => "forbidden",
            TeamLinkError::NotFound(_) => "not_found",
            TeamLinkError::Validation(_) => "invalid_request",
            TeamLinkError::Conflict(_) => "conflict",
            TeamLinkError::Transient(_) => "unavailable",
            _ => "internal_error",
        }
    }

    /// Client-facing text. Internal details stay in the log.
    fn message(&self) -> String {
        match &self.0 {
            TeamLinkError::Config(_) => "Slack integration is not configured".to_string(),
            TeamLinkError::Transient(_) => "Slack is unavailable, try again later".to_string(),
            TeamLinkError::Database(_) | TeamLinkError::Io(_) | TeamLinkError::Json(_) => {
                "internal error".to_string()
            }
            TeamLinkError::Platform(_) => "Slack request failed".to_string(),
            TeamLinkError::Unauthenticated => "sign in required".to_string(),
            TeamLinkError::Authentication(msg)
            | TeamLinkError::Permission(msg)
            | TeamLinkError::NotFound(msg)
            | TeamLinkError::Validation(msg)
            | TeamLinkError::Conflict(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (
            status,
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": self.message(),
                }
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
