use tl_config::Config;
use tl_core::Services;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    /// Bearer token required on `/api` routes, if set.
    pub gateway_token: Option<String>,
    pub max_upload_bytes: usize,
}

/// Uploads above this size are rejected before reaching Slack.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

impl AppState {
    pub fn new(config: &Config, services: Services) -> Self {
        Self {
            services,
            gateway_token: config.gateway_token.clone(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}
