use std::path::PathBuf;
use std::time::Duration;

use tl_types::{Result, TeamLinkError, MAX_CACHED_MESSAGES, STALE_AFTER_SECS};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Project settings
    pub project_name: String,
    pub debug: bool,

    // Paths
    pub base_dir: PathBuf,
    pub store_dir: PathBuf,
    pub db_path: PathBuf,
    pub db_connection_pool_size: u32,

    // Slack
    pub slack_api_base: String,
    pub slack_request_timeout_ms: u64,
    pub slack_team_id: Option<String>,

    // Credential cache
    pub bot_token_ttl_secs: u64,

    // Channel cache
    pub cache_stale_secs: u64,
    pub cache_max_messages: usize,

    // Membership sync
    pub sync_max_concurrent: usize,
    pub profile_cache_size: usize,

    // Links rendered into welcome messages
    pub app_base_url: Option<String>,

    // Logging
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub log_structured: bool,

    // Web
    pub web_host: String,
    pub web_port: u16,
    pub gateway_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables (with dotenvy).
    pub fn load() -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let base_dir = env_or("BASE_DIR", || {
            std::env::current_dir()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });
        let base = PathBuf::from(&base_dir);
        let store_dir = env_path_or("STORE_DIR", || base.join("store"));

        let config = Config {
            project_name: env_or("PROJECT_NAME", || "TeamLink".to_string()),
            debug: env_bool("DEBUG", false),

            base_dir: base.clone(),
            store_dir: store_dir.clone(),
            db_path: env_path_or("DB_PATH", || store_dir.join("teamlink.db")),
            db_connection_pool_size: env_u32("DB_CONNECTION_POOL_SIZE", 5),

            slack_api_base: env_or("SLACK_API_BASE", || "https://slack.com/api".to_string()),
            slack_request_timeout_ms: env_u64("SLACK_REQUEST_TIMEOUT_MS", 10_000),
            slack_team_id: env_opt("SLACK_TEAM_ID"),

            bot_token_ttl_secs: env_u64("BOT_TOKEN_TTL_SECS", 3600),

            cache_stale_secs: env_u64("CACHE_STALE_SECS", STALE_AFTER_SECS as u64),
            cache_max_messages: env_usize("CACHE_MAX_MESSAGES", MAX_CACHED_MESSAGES)
                .clamp(1, MAX_CACHED_MESSAGES),

            sync_max_concurrent: env_usize("SYNC_MAX_CONCURRENT", 4).max(1),
            profile_cache_size: env_usize("PROFILE_CACHE_SIZE", 500),

            app_base_url: env_opt("APP_BASE_URL"),

            log_level: env_or("LOG_LEVEL", || "info".to_string()),
            log_file: env_opt("LOG_FILE").map(PathBuf::from),
            log_structured: env_bool("LOG_STRUCTURED", false),

            web_host: env_or("WEB_HOST", || "0.0.0.0".to_string()),
            web_port: env_u16("WEB_PORT", 8080),
            gateway_token: env_opt("GATEWAY_TOKEN"),
        };

        Ok(config)
    }

    /// Create required directories.
    pub fn create_directories(&self) -> Result<()> {
        let mut dirs = vec![self.store_dir.clone()];
        if let Some(parent) = self.db_path.parent() {
            dirs.push(parent.to_path_buf());
        }
        if let Some(parent) = self.log_file.as_ref().and_then(|p| p.parent()) {
            dirs.push(parent.to_path_buf());
        }

        for dir in &dirs {
            if dir.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(dir).map_err(|e| {
                TeamLinkError::Config(format!(
                    "Failed to create directory {}: {e}",
                    dir.display()
                ))
            })?;
        }

        Ok(())
    }

    pub fn slack_request_timeout(&self) -> Duration {
        Duration::from_millis(self.slack_request_timeout_ms.max(1))
    }

    pub fn bot_token_ttl(&self) -> Duration {
        Duration::from_secs(self.bot_token_ttl_secs)
    }

    pub fn cache_stale_after(&self) -> Duration {
        Duration::from_secs(self.cache_stale_secs)
    }

    /// Address the HTTP server binds to.
    pub fn web_addr(&self) -> String {
        format!("{}:{}", self.web_host, self.web_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        let base = PathBuf::from(".");
        Self {
            project_name: "TeamLink".to_string(),
            debug: false,
            base_dir: base.clone(),
            store_dir: base.join("store"),
            db_path: base.join("store/teamlink.db"),
            db_connection_pool_size: 5,
            slack_api_base: "https://slack.com/api".to_string(),
            slack_request_timeout_ms: 10_000,
            slack_team_id: None,
            bot_token_ttl_secs: 3600,
            cache_stale_secs: STALE_AFTER_SECS as u64,
            cache_max_messages: MAX_CACHED_MESSAGES,
            sync_max_concurrent: 4,
            profile_cache_size: 500,
            app_base_url: None,
            log_level: "info".to_string(),
            log_file: None,
            log_structured: false,
            web_host: "0.0.0.0".to_string(),
            web_port: 8080,
            gateway_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    std::env::var(key).unwrap_or_else(|_| default())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(default)
}
