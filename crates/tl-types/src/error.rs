use thiserror::Error;

/// Top-level error type for TeamLink.
///
/// Variants follow the taxonomy the HTTP layer maps to status codes:
/// configuration and database problems are server errors, credential and
/// permission problems carry text an administrator can act on.
#[derive(Error, Debug)]
pub enum TeamLinkError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The chat platform rejected the credential we presented.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No application session accompanied the request.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Network failure, timeout or rate limit. Safe to retry later.
    #[error("Transient error: {0}")]
    Transient(String),

    /// The chat platform answered with an error we do not classify.
    #[error("Chat platform error: {0}")]
    Platform(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TeamLinkError {
    /// Whether the bot credential should be evicted after this error.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, TeamLinkError>;
