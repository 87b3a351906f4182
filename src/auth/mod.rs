//! Authorizers
//!
//! An [`Authorizer`] produces the `Authorization` header for a request. The transport
//! asks for a fresh header before every attempt and, when a response comes back 401,
//! gives the authorizer one chance per request to fix things through
//! [`Authorizer::handle_missing_authorization`].
//!
//! Static authorizers live here. Self-renewing OAuth2 authorizers are in [`renewing`]
//! and [`grants`].

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Result;

pub mod client;
pub mod grants;
pub mod renewing;
pub mod token;

pub use client::AuthClient;
pub use grants::{
    ClientCredentialsAuthorizer, ClientCredentialsGrant, OAuthClient, RefreshTokenAuthorizer,
    RefreshTokenGrant,
};
pub use renewing::{OnRefresh, RenewingAuthorizer, RenewingOptions, TokenGrant};
pub use token::{OAuthTokenResponse, TokenRecord};

/// Supplies the `Authorization` header value.
pub trait Authorizer: Send + Sync {
    /// Header value for the next attempt. `None` means the request must carry no
    /// `Authorization` header at all.
    fn authorization_header(&self) -> Result<Option<String>>;

    /// Called when a request was rejected as unauthorized.
    ///
    /// Returns true if the authorizer did something that may make a retry succeed.
    fn handle_missing_authorization(&self) -> bool {
        false
    }
}

/// Sends no credentials, and removes any caller-supplied `Authorization` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuthorizer;

impl Authorizer for NullAuthorizer {
    fn authorization_header(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Fixed bearer token.
pub struct AccessTokenAuthorizer {
    access_token: SecretString,
}

impl AccessTokenAuthorizer {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

impl Authorizer for AccessTokenAuthorizer {
    fn authorization_header(&self) -> Result<Option<String>> {
        Ok(Some(format!("Bearer {}", self.access_token.expose_secret())))
    }
}

impl fmt::Debug for AccessTokenAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenAuthorizer").finish_non_exhaustive()
    }
}

/// HTTP Basic credentials, used by confidential OAuth2 clients.
pub struct BasicAuthorizer {
    header: SecretString,
}

impl BasicAuthorizer {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self {
            header: SecretString::from(format!("Basic {encoded}")),
        }
    }
}

impl Authorizer for BasicAuthorizer {
    fn authorization_header(&self) -> Result<Option<String>> {
        Ok(Some(self.header.expose_secret().to_string()))
    }
}

impl fmt::Debug for BasicAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthorizer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_headers() {
        assert_eq!(NullAuthorizer.authorization_header().unwrap(), None);
        assert_eq!(
            AccessTokenAuthorizer::new("abc")
                .authorization_header()
                .unwrap()
                .as_deref(),
            Some("Bearer abc")
        );
        // base64("client:secret")
        assert_eq!(
            BasicAuthorizer::new("client", "secret")
                .authorization_header()
                .unwrap()
                .as_deref(),
            Some("Basic Y2xpZW50OnNlY3JldA==")
        );
    }

    #[test]
    fn static_authorizers_cannot_handle_401() {
        assert!(!NullAuthorizer.handle_missing_authorization());
        assert!(!AccessTokenAuthorizer::new("abc").handle_missing_authorization());
        assert!(!BasicAuthorizer::new("a", "b").handle_missing_authorization());
    }

    #[test]
    fn debug_never_shows_secrets() {
        let rendered = format!(
            "{:?} {:?}",
            AccessTokenAuthorizer::new("super-secret"),
            BasicAuthorizer::new("id", "super-secret")
        );
        assert!(!rendered.contains("super-secret"));
    }
}
