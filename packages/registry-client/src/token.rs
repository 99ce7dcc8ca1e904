//! OAuth2 client-credentials tokens and the shared token cache.
//!
//! ```text
//! caller ─┐
//! caller ─┼─► TokenCache::token() ──fresh?──► cached AccessToken
//! caller ─┘          │
//!                    └─stale/absent─► one shared refresh future ─► TokenSource
//! ```

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::AuthError;
use crate::types::{TokenRequest, TokenResponse};

/// Tokens are refreshed once they are inside this window before expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// A bearer token with its local expiry instant.
#[derive(Clone)]
pub struct AccessToken {
    value: Arc<str>,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            value: Arc::from(value.into()),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn from_response(response: TokenResponse) -> Self {
        Self::new(response.access_token, Duration::from_secs(response.expires_in))
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Still usable for at least `margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint a new bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError>;
}

/// Client-credentials grant settings.
#[derive(Debug)]
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: String,
}

/// Token source backed by an OAuth2 token endpoint.
pub struct OAuthTokenSource {
    client: reqwest::Client,
    credentials: ClientCredentials,
}

impl OAuthTokenSource {
    pub fn new(client: reqwest::Client, credentials: ClientCredentials) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
        let form = TokenRequest {
            client_id: &self.credentials.client_id,
            client_secret: self.credentials.client_secret.expose_secret(),
            grant_type: "client_credentials",
            scope: &self.credentials.scope,
        };

        let resp = self
            .client
            .post(&self.credentials.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        tracing::info!(expires_in = token.expires_in, "Obtained registry access token");
        Ok(AccessToken::from_response(token))
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, AuthError>>>;

#[derive(Default)]
struct CacheState {
    current: Option<AccessToken>,
    in_flight: Option<(u64, RefreshFuture)>,
    generation: u64,
}

/// Shared bearer-token cache with single-flight refresh.
///
/// Every concurrent caller that finds the token absent or about to expire
/// awaits the same refresh; exactly one request reaches the token source and
/// all callers see its token or its error. A failed refresh is not cached.
pub struct TokenCache<S> {
    source: Arc<S>,
    state: Mutex<CacheState>,
    refresh_margin: Duration,
}

impl<S: TokenSource + 'static> TokenCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_refresh_margin(source, DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_refresh_margin(source: S, refresh_margin: Duration) -> Self {
        Self {
            source: Arc::new(source),
            state: Mutex::new(CacheState::default()),
            refresh_margin,
        }
    }

    /// Return a usable token, refreshing it first if needed.
    pub async fn token(&self) -> Result<AccessToken, AuthError> {
        let (generation, refresh) = {
            let mut state = self.lock();

            if let Some(token) = &state.current {
                if token.is_fresh(self.refresh_margin) {
                    return Ok(token.clone());
                }
            }

            match &state.in_flight {
                Some((generation, refresh)) => (*generation, refresh.clone()),
                None => {
                    state.generation += 1;
                    let source = Arc::clone(&self.source);
                    let refresh = async move { source.fetch_token().await }
                        .boxed()
                        .shared();
                    state.in_flight = Some((state.generation, refresh.clone()));
                    tracing::debug!(generation = state.generation, "Refreshing registry token");
                    (state.generation, refresh)
                }
            }
        };

        let result = refresh.await;

        let mut state = self.lock();
        if matches!(&state.in_flight, Some((g, _)) if *g == generation) {
            state.in_flight = None;
            match &result {
                Ok(token) => state.current = Some(token.clone()),
                Err(e) => tracing::warn!(error = %e, "Registry token refresh failed"),
            }
        }

        result
    }

    /// Drop the cached token so the next call refreshes.
    pub fn invalidate(&self) {
        self.lock().current = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        lifetime: Duration,
        fail: bool,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(AuthError::Rejected {
                    status: 401,
                    message: "invalid_client".into(),
                });
            }
            Ok(AccessToken::new(format!("token-{}", n), self.lifetime))
        }
    }

    fn cache(lifetime: Duration, fail: bool) -> (Arc<TokenCache<CountingSource>>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            calls: calls.clone(),
            lifetime,
            fail,
        };
        (Arc::new(TokenCache::new(source)), calls)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let (cache, calls) = cache(Duration::from_secs(3600), false);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.token().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.secret(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_token_is_reused() {
        let (cache, calls) = cache(Duration::from_secs(3600), false);

        cache.token().await.unwrap();
        cache.token().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_inside_last_minute_is_refreshed() {
        let (cache, calls) = cache(Duration::from_secs(30), false);

        let first = cache.token().await.unwrap();
        let second = cache.token().await.unwrap();

        assert_eq!(first.secret(), "token-1");
        assert_eq!(second.secret(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let (cache, calls) = cache(Duration::from_secs(3600), true);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.token().await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, AuthError::Rejected { status: 401, .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(cache.token().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let (cache, calls) = cache(Duration::from_secs(3600), false);

        cache.token().await.unwrap();
        cache.invalidate();
        let token = cache.token().await.unwrap();

        assert_eq!(token.secret(), "token-2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debug_redacts_token() {
        let token = AccessToken::new("super-secret", Duration::from_secs(60));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
