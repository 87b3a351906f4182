//! Self-renewing authorizers
//!
//! A [`RenewingAuthorizer`] caches an access token and its expiry, and fetches a new one
//! through its [`TokenGrant`] when the token is missing, about to expire, or was
//! rejected by the server. How a token is obtained is the grant's business; see
//! [`grants`](super::grants) for the refresh-token and client-credentials grants.
//!
//! Renewal happens lazily, when the transport asks for a header. A 401 only marks the
//! cached token as expired.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use super::Authorizer;
use super::token::{OAuthTokenResponse, TokenRecord};
use crate::defaults;
use crate::error::{Result, TransportError};

const LOG_TARGET: &str = "sdk_transport::auth";

/// SHA-256 of a token, hex encoded. Safe to log.
pub(crate) fn token_fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Obtains fresh tokens for a [`RenewingAuthorizer`].
pub trait TokenGrant: Send + Sync {
    /// Perform the grant. The response must hold exactly one token.
    fn fetch_token(&self) -> Result<OAuthTokenResponse>;

    /// Called with the new token before it is installed.
    fn on_token(&self, _token: &TokenRecord) {}

    /// Name used in logs.
    fn name(&self) -> &str {
        "token_grant"
    }
}

/// Called with the full token response after every renewal.
pub type OnRefresh = Arc<dyn Fn(&OAuthTokenResponse) + Send + Sync>;

/// Initial state for a [`RenewingAuthorizer`].
#[derive(Default, Clone)]
pub struct RenewingOptions {
    access_token: Option<String>,
    expires_at: Option<i64>,
    on_refresh: Option<OnRefresh>,
}

impl RenewingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known token expiring at `expires_at` (Unix seconds).
    pub fn access_token(mut self, access_token: impl Into<String>, expires_at: i64) -> Self {
        self.access_token = Some(access_token.into());
        self.expires_at = Some(expires_at);
        self
    }

    /// Start from stored values, which must be both present or both absent.
    pub fn from_parts(access_token: Option<String>, expires_at: Option<i64>) -> Result<Self> {
        match (access_token, expires_at) {
            (Some(token), Some(exp)) => Ok(Self::new().access_token(token, exp)),
            (None, None) => Ok(Self::new()),
            _ => Err(TransportError::usage(
                "a renewing authorizer needs both access_token and expires_at, or neither",
            )),
        }
    }

    /// Observe every token response, for example to persist it.
    pub fn on_refresh<F>(mut self, on_refresh: F) -> Self
    where
        F: Fn(&OAuthTokenResponse) + Send + Sync + 'static,
    {
        self.on_refresh = Some(Arc::new(on_refresh));
        self
    }
}

impl fmt::Debug for RenewingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewingOptions")
            .field("has_access_token", &self.access_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("has_on_refresh", &self.on_refresh.is_some())
            .finish()
    }
}

struct TokenState {
    access_token: Option<SecretString>,
    // None means "renew before next use"; the stale token may still be present
    expires_at: Option<i64>,
}

/// Authorizer that keeps a bearer token valid by renewing it through a grant.
///
/// Can be shared between threads. The state lock is not held while renewing, so two
/// threads seeing a stale token may both renew; either result is a valid token.
pub struct RenewingAuthorizer<G: TokenGrant> {
    grant: G,
    state: Mutex<TokenState>,
    on_refresh: Option<OnRefresh>,
}

impl<G: TokenGrant> RenewingAuthorizer<G> {
    /// Build the authorizer, renewing immediately if no token was supplied.
    pub fn new(grant: G, options: RenewingOptions) -> Result<Self> {
        let has_token = options.access_token.is_some();
        let authorizer = Self {
            grant,
            state: Mutex::new(TokenState {
                access_token: options.access_token.map(SecretString::from),
                expires_at: options.expires_at,
            }),
            on_refresh: options.on_refresh,
        };

        if has_token {
            tracing::info!(
                target: LOG_TARGET,
                grant = authorizer.grant.name(),
                expires_at = ?authorizer.expires_at(),
                "setting up renewing authorizer with existing token"
            );
        } else {
            tracing::info!(
                target: LOG_TARGET,
                grant = authorizer.grant.name(),
                "no access token given, fetching one"
            );
            authorizer.renew()?;
        }
        Ok(authorizer)
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn renew(&self) -> Result<()> {
        let response = self.grant.fetch_token()?;
        let token = response.single_token()?;
        self.grant.on_token(token);

        {
            let mut state = self.lock();
            state.access_token = Some(SecretString::from(token.access_token().to_string()));
            state.expires_at = Some(token.expires_at_seconds);
        }
        tracing::info!(
            target: LOG_TARGET,
            grant = self.grant.name(),
            resource_server = %token.resource_server,
            expires_at = token.expires_at_seconds,
            "access token updated"
        );
        tracing::debug!(
            target: LOG_TARGET,
            token_hash = %token_fingerprint(token.access_token()),
            "new access token"
        );

        if let Some(on_refresh) = &self.on_refresh {
            on_refresh(&response);
        }
        Ok(())
    }

    /// Renew the token if it is missing, invalidated, or expires within the skew window.
    pub fn ensure_valid_token(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = self.lock().expires_at;
        let stale = match expires_at {
            Some(exp) => now >= exp - defaults::auth::EXPIRES_ADJUST_SECONDS,
            None => true,
        };
        if stale {
            tracing::debug!(
                target: LOG_TARGET,
                grant = self.grant.name(),
                ?expires_at,
                "access token is stale, renewing"
            );
            self.renew()?;
        }
        Ok(())
    }

    /// Current access token, possibly stale.
    pub fn access_token(&self) -> Option<String> {
        self.lock()
            .access_token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
    }

    /// Expiry of the current token in Unix seconds; `None` once invalidated.
    pub fn expires_at(&self) -> Option<i64> {
        self.lock().expires_at
    }

    pub fn grant(&self) -> &G {
        &self.grant
    }
}

impl<G: TokenGrant> Authorizer for RenewingAuthorizer<G> {
    fn authorization_header(&self) -> Result<Option<String>> {
        self.ensure_valid_token()?;
        Ok(self
            .lock()
            .access_token
            .as_ref()
            .map(|t| format!("Bearer {}", t.expose_secret())))
    }

    fn handle_missing_authorization(&self) -> bool {
        tracing::info!(
            target: LOG_TARGET,
            grant = self.grant.name(),
            "authorization rejected, marking access token as expired"
        );
        self.lock().expires_at = None;
        true
    }
}

impl<G: TokenGrant> fmt::Debug for RenewingAuthorizer<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewingAuthorizer")
            .field("grant", &self.grant.name())
            .field("expires_at", &self.expires_at())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    /// Issues `token-N` valid for an hour; can be told to return two tokens.
    #[derive(Default)]
    struct CountingGrant {
        calls: AtomicUsize,
        tokens_per_response: usize,
    }

    impl CountingGrant {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                tokens_per_response: 1,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenGrant for CountingGrant {
        fn fetch_token(&self) -> Result<OAuthTokenResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let others: Vec<_> = (1..self.tokens_per_response)
                .map(|i| {
                    json!({
                        "access_token": format!("other-{i}"),
                        "scope": "other",
                        "resource_server": format!("rs-{i}"),
                        "expires_in": 3600,
                    })
                })
                .collect();
            let body = if self.tokens_per_response == 0 {
                json!({})
            } else {
                json!({
                    "access_token": format!("token-{n}"),
                    "scope": "all",
                    "resource_server": "rs",
                    "expires_in": 3600,
                    "other_tokens": others,
                })
            };
            OAuthTokenResponse::from_json(body)
        }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn renews_on_construction_without_token() {
        let auth = RenewingAuthorizer::new(CountingGrant::new(), RenewingOptions::new()).unwrap();
        assert_eq!(auth.grant().calls(), 1);
        assert_eq!(
            auth.authorization_header().unwrap().as_deref(),
            Some("Bearer token-0")
        );
        assert_eq!(auth.grant().calls(), 1);
        assert!(auth.expires_at().unwrap() > now());
    }

    #[test]
    fn valid_token_is_not_renewed() {
        let options = RenewingOptions::new().access_token("stored", now() + 3600);
        let auth = RenewingAuthorizer::new(CountingGrant::new(), options).unwrap();
        auth.ensure_valid_token().unwrap();
        auth.ensure_valid_token().unwrap();
        assert_eq!(auth.grant().calls(), 0);
        assert_eq!(auth.access_token().as_deref(), Some("stored"));
    }

    #[test]
    fn token_inside_skew_window_is_renewed() {
        let options = RenewingOptions::new().access_token("stored", now() + 30);
        let auth = RenewingAuthorizer::new(CountingGrant::new(), options).unwrap();
        assert_eq!(
            auth.authorization_header().unwrap().as_deref(),
            Some("Bearer token-0")
        );
        assert_eq!(auth.grant().calls(), 1);
    }

    #[test]
    fn missing_authorization_invalidates_lazily() {
        let auth = RenewingAuthorizer::new(CountingGrant::new(), RenewingOptions::new()).unwrap();
        assert!(auth.handle_missing_authorization());
        assert_eq!(auth.expires_at(), None);
        // stale token stays until the next header request
        assert_eq!(auth.access_token().as_deref(), Some("token-0"));
        assert_eq!(auth.grant().calls(), 1);

        assert_eq!(
            auth.authorization_header().unwrap().as_deref(),
            Some("Bearer token-1")
        );
        assert_eq!(auth.grant().calls(), 2);
    }

    #[test]
    fn renewal_must_yield_exactly_one_token() {
        for count in [0, 2] {
            let grant = CountingGrant {
                calls: AtomicUsize::new(0),
                tokens_per_response: count,
            };
            let result = RenewingAuthorizer::new(grant, RenewingOptions::new());
            assert!(result.is_err(), "{count} tokens");
        }

        let grant = CountingGrant {
            calls: AtomicUsize::new(0),
            tokens_per_response: 2,
        };
        let err = RenewingAuthorizer::new(grant, RenewingOptions::new()).unwrap_err();
        assert!(matches!(err, TransportError::Usage(_)));
    }

    #[test]
    fn on_refresh_sees_every_response() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let options = {
            let seen = seen.clone();
            RenewingOptions::new().on_refresh(move |resp: &OAuthTokenResponse| {
                let token = resp.single_token().unwrap().access_token().to_string();
                seen.lock().unwrap().push(token);
            })
        };
        let auth = RenewingAuthorizer::new(CountingGrant::new(), options).unwrap();
        auth.handle_missing_authorization();
        auth.ensure_valid_token().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["token-0", "token-1"]);
    }

    #[test]
    fn half_specified_state_is_rejected() {
        assert!(RenewingOptions::from_parts(Some("t".into()), None).is_err());
        assert!(RenewingOptions::from_parts(None, Some(10)).is_err());
        assert!(RenewingOptions::from_parts(None, None).is_ok());
        assert!(RenewingOptions::from_parts(Some("t".into()), Some(10)).is_ok());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            token_fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    #[traced_test]
    fn renewal_logs_fingerprint_not_token() {
        RenewingAuthorizer::new(CountingGrant::new(), RenewingOptions::new()).unwrap();
        assert!(logs_contain("access token updated"));
        assert!(logs_contain(&token_fingerprint("token-0")));
        assert!(!logs_contain("Bearer token-0"));
    }
}
