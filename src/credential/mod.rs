//! Credential Service — issues and rotates short-lived session tokens (§4.3).

mod rest;

pub use rest::{RestTokenIssuer, RestTokenIssuerConfig};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CoreError;

/// Default token lifetime when the issuer does not say otherwise (§4.3).
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(900);
/// How long before expiry a proactive refresh is scheduled.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(300);
/// Floor on the proactive-refresh buffer: never schedule less than this far out.
pub const MIN_REFRESH_LEAD: Duration = Duration::from_secs(30);
/// Fixed backoff between failed refresh attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(60);
/// Refresh attempts before giving up and falling back to the cached token.
pub const DEFAULT_RETRY_CAP: u32 = 3;

/// A short-lived session token (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// REST collaborator issuing fresh tokens. External to this crate (§1).
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self) -> Result<Token, CoreError>;
}

struct Cache {
    token: Option<Token>,
}

/// Caches a single venue's session token and serializes refreshes.
///
/// Single-flight is implemented by funnelling every `get_token` call through
/// one `Mutex<Cache>`: concurrent callers simply queue on the lock, and each
/// re-checks validity after acquiring it, so only the first caller actually
/// issues a request — everyone behind it observes the freshly cached token.
pub struct CredentialService<I: TokenIssuer> {
    issuer: I,
    cache: Mutex<Cache>,
    refresh_buffer: Duration,
    retry_backoff: Duration,
    retry_cap: u32,
}

impl<I: TokenIssuer> CredentialService<I> {
    pub fn new(issuer: I) -> Self {
        Self {
            issuer,
            cache: Mutex::new(Cache { token: None }),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            retry_cap: DEFAULT_RETRY_CAP,
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn with_retry_policy(mut self, backoff: Duration, cap: u32) -> Self {
        self.retry_backoff = backoff;
        self.retry_cap = cap;
        self
    }

    /// Returns a valid token, fetching or refreshing as needed. Never hands
    /// out a token whose `expires_at <= now` (§4.3 invariant) unless every
    /// refresh attempt in this call failed and the cached token is still
    /// inside its own validity window, in which case that stale-but-valid
    /// token is returned and a warning logged.
    pub async fn get_token(&self) -> Result<Token, CoreError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();

        if let Some(token) = &cache.token {
            if token.is_valid(now) {
                return Ok(token.clone());
            }
        }

        self.fetch_with_retry(&mut cache, now).await
    }

    /// Forces a refresh regardless of the cached token's remaining validity,
    /// falling back to the cached value if every attempt fails and it is
    /// still valid (§4.3: "fall back to returning the cached token").
    pub async fn refresh(&self) -> Result<Token, CoreError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        self.fetch_with_retry(&mut cache, now).await
    }

    async fn fetch_with_retry(
        &self,
        cache: &mut Cache,
        now: DateTime<Utc>,
    ) -> Result<Token, CoreError> {
        let mut last_err = None;
        for attempt in 0..self.retry_cap {
            match self.issuer.issue_token().await {
                Ok(token) => {
                    info!(expires_at = %token.expires_at, "token refreshed");
                    cache.token = Some(token.clone());
                    return Ok(token);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "token refresh attempt failed");
                    last_err = Some(e);
                    if attempt + 1 < self.retry_cap {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        if let Some(token) = &cache.token {
            if token.is_valid(now) {
                warn!("token refresh exhausted retries; falling back to cached token");
                return Ok(token.clone());
            }
        }

        Err(last_err.unwrap_or_else(|| CoreError::Auth("token refresh failed".into())))
    }

    /// How long to sleep before the next proactive refresh should fire,
    /// given the currently cached token (or immediately, if there is none).
    async fn lead_time(&self) -> Duration {
        let cache = self.cache.lock().await;
        match &cache.token {
            Some(token) => {
                let lead = token.expires_at - chrono::Duration::from_std(self.refresh_buffer).unwrap_or_default();
                let now = Utc::now();
                let remaining = (lead - now).to_std().unwrap_or(Duration::ZERO);
                remaining.max(MIN_REFRESH_LEAD)
            }
            None => Duration::ZERO,
        }
    }

    /// Spawns the background proactive-refresh loop (§4.3 `schedule_refresh`).
    /// `on_refresh` is invoked with the outcome of every attempt, mirroring
    /// the teacher's `on_reconnect_failed`-style callback hooks.
    pub fn schedule_refresh(
        self: Arc<Self>,
        on_refresh: impl Fn(Result<(), CoreError>) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()>
    where
        I: 'static,
    {
        tokio::spawn(async move {
            loop {
                let sleep_for = self.lead_time().await;
                tokio::time::sleep(sleep_for).await;
                let outcome = self.refresh().await.map(|_| ());
                on_refresh(outcome);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockIssuer {
        calls: AtomicU32,
        lifetime: chrono::Duration,
        /// Calls at or after this index fail.
        succeed_before: u32,
    }

    #[async_trait::async_trait]
    impl TokenIssuer for MockIssuer {
        async fn issue_token(&self) -> Result<Token, CoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.succeed_before {
                return Err(CoreError::Auth("mock failure".into()));
            }
            Ok(Token {
                value: format!("token-{call}"),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    #[tokio::test]
    async fn issues_and_caches_token() {
        let service = CredentialService::new(MockIssuer {
            calls: AtomicU32::new(0),
            lifetime: chrono::Duration::seconds(900),
            succeed_before: u32::MAX,
        });
        let first = service.get_token().await.unwrap();
        let second = service.get_token().await.unwrap();
        assert_eq!(first, second, "cached token reused without a second issue call");
    }

    #[tokio::test]
    async fn falls_back_to_stale_cached_token_when_refresh_fails() {
        let service = CredentialService::new(MockIssuer {
            calls: AtomicU32::new(0),
            lifetime: chrono::Duration::seconds(900),
            succeed_before: 1,
        })
        .with_refresh_buffer(Duration::from_secs(300))
        .with_retry_policy(Duration::from_millis(1), 2);

        let first = service.get_token().await.unwrap();
        assert!(first.is_valid(Utc::now()));

        // Every subsequent issuer call fails; forcing a refresh must fall
        // back to the still-valid cached token rather than erroring.
        let refreshed = service.refresh().await.unwrap();
        assert_eq!(refreshed, first);
    }
}
