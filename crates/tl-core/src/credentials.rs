//! Bot credential cache.
//!
//! The bot token lives in the settings table. Every Slack call needs it, so
//! it is held in memory for a TTL and dropped as soon as Slack rejects it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tl_db::{Database, SettingsRepository, BOT_TOKEN_KEY};
use tl_types::{Result, TeamLinkError};
use tracing::{debug, warn};

/// Where the persisted bot token is read from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load_bot_token(&self) -> Result<Option<String>>;
}

/// Reads the bot token from the settings table.
pub struct SettingsCredentialSource {
    db: Arc<Database>,
}

impl SettingsCredentialSource {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialSource for SettingsCredentialSource {
    async fn load_bot_token(&self) -> Result<Option<String>> {
        SettingsRepository::new(&self.db).get(BOT_TOKEN_KEY).await
    }
}

#[derive(Debug, Clone)]
struct BotCredential {
    token: String,
    expires_at: Instant,
}

pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    ttl: Duration,
    cached: Mutex<Option<BotCredential>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Current bot token, or `None` if none is configured.
    pub async fn get_token(&self) -> Result<Option<String>> {
        self.get_token_at(Instant::now()).await
    }

    /// Same as [`get_token`](Self::get_token) with an explicit clock.
    pub async fn get_token_at(&self, now: Instant) -> Result<Option<String>> {
        if let Some(token) = self.cached_at(now) {
            return Ok(Some(token));
        }

        let Some(token) = self.source.load_bot_token().await? else {
            debug!("No bot token configured");
            return Ok(None);
        };

        *self.lock() = Some(BotCredential {
            token: token.clone(),
            expires_at: now + self.ttl,
        });
        debug!(ttl_secs = self.ttl.as_secs(), "Bot token cached");
        Ok(Some(token))
    }

    /// Bot token, or a configuration error when none is set.
    pub async fn require_token(&self) -> Result<String> {
        self.get_token()
            .await?
            .ok_or_else(|| TeamLinkError::Config("Slack bot token not configured".to_string()))
    }

    /// Drop the cached token regardless of its expiry.
    pub fn invalidate(&self) {
        if self.lock().take().is_some() {
            debug!("Bot token cache invalidated");
        }
    }

    /// Invalidate when `result` carries an authentication failure.
    pub fn observe<T>(&self, result: &Result<T>) {
        if let Err(e) = result {
            if e.is_authentication() {
                warn!(error = %e, "Slack rejected bot token, evicting cached credential");
                self.invalidate();
            }
        }
    }

    fn cached_at(&self, now: Instant) -> Option<String> {
        let mut cached = self.lock();
        match cached.as_ref() {
            Some(credential) if now < credential.expires_at => Some(credential.token.clone()),
            Some(_) => {
                *cached = None;
                None
            }
            None => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<BotCredential>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        token: Mutex<Option<String>>,
        loads: AtomicUsize,
    }

    impl CountingSource {
        fn new(token: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new(token.map(str::to_string)),
                loads: AtomicUsize::new(0),
            })
        }

        fn set(&self, token: &str) {
            *self.token.lock().unwrap() = Some(token.to_string());
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn load_bot_token(&self) -> Result<Option<String>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.token.lock().unwrap().clone())
        }
    }

    const TTL: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = CountingSource::new(Some("xoxb-1"));
        let cache = CredentialCache::new(source.clone(), TTL);
        let start = Instant::now();

        assert_eq!(cache.get_token_at(start).await.unwrap().as_deref(), Some("xoxb-1"));
        source.set("xoxb-2");
        let later = start + TTL - Duration::from_secs(1);
        assert_eq!(cache.get_token_at(later).await.unwrap().as_deref(), Some("xoxb-1"));
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn reloads_at_expiry() {
        let source = CountingSource::new(Some("xoxb-1"));
        let cache = CredentialCache::new(source.clone(), TTL);
        let start = Instant::now();

        cache.get_token_at(start).await.unwrap();
        source.set("xoxb-2");

        let token = cache.get_token_at(start + TTL).await.unwrap();
        assert_eq!(token.as_deref(), Some("xoxb-2"));
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = CountingSource::new(Some("xoxb-1"));
        let cache = CredentialCache::new(source.clone(), TTL);

        cache.get_token().await.unwrap();
        cache.invalidate();
        cache.get_token().await.unwrap();
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn observe_only_evicts_on_auth_failure() {
        let source = CountingSource::new(Some("xoxb-1"));
        let cache = CredentialCache::new(source.clone(), TTL);
        cache.get_token().await.unwrap();

        cache.observe::<()>(&Err(TeamLinkError::Transient("timeout".to_string())));
        cache.get_token().await.unwrap();
        assert_eq!(source.loads(), 1);

        cache.observe::<()>(&Err(TeamLinkError::Authentication("invalid_auth".to_string())));
        cache.get_token().await.unwrap();
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn absent_token_is_configuration_error() {
        let source = CountingSource::new(None);
        let cache = CredentialCache::new(source.clone(), TTL);

        assert!(cache.get_token().await.unwrap().is_none());
        let err = cache.require_token().await.unwrap_err();
        assert!(matches!(err, TeamLinkError::Config(_)));

        // Absence is not cached.
        source.set("xoxb-1");
        assert_eq!(cache.require_token().await.unwrap(), "xoxb-1");
    }

    #[tokio::test]
    async fn reads_from_settings_table() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        db.initialize().await.unwrap();
        SettingsRepository::new(&db)
            .set(BOT_TOKEN_KEY, "xoxb-db")
            .await
            .unwrap();

        let cache = CredentialCache::new(Arc::new(SettingsCredentialSource::new(db)), TTL);
        assert_eq!(cache.require_token().await.unwrap(), "xoxb-db");
    }
}
