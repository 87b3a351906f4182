//! Refresh-token and client-credentials grants.

use std::sync::{Arc, Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};

use super::renewing::{RenewingAuthorizer, RenewingOptions, TokenGrant};
use super::token::{OAuthTokenResponse, TokenRecord};
use crate::error::Result;

const LOG_TARGET: &str = "sdk_transport::auth";

/// The token endpoint operations the grants need.
pub trait OAuthClient: Send + Sync {
    fn oauth2_refresh_token(&self, refresh_token: &str) -> Result<OAuthTokenResponse>;

    /// Client-credentials grant for the space-separated `scopes`.
    fn oauth2_client_credentials_tokens(&self, scopes: &str) -> Result<OAuthTokenResponse>;
}

impl<T: OAuthClient + ?Sized> OAuthClient for Arc<T> {
    fn oauth2_refresh_token(&self, refresh_token: &str) -> Result<OAuthTokenResponse> {
        (**self).oauth2_refresh_token(refresh_token)
    }

    fn oauth2_client_credentials_tokens(&self, scopes: &str) -> Result<OAuthTokenResponse> {
        (**self).oauth2_client_credentials_tokens(scopes)
    }
}

/// Exchanges a refresh token for access tokens, following refresh token rotation.
pub struct RefreshTokenGrant<C> {
    refresh_token: Mutex<SecretString>,
    client: C,
}

impl<C: OAuthClient> RefreshTokenGrant<C> {
    pub fn new(refresh_token: impl Into<String>, client: C) -> Self {
        Self {
            refresh_token: Mutex::new(SecretString::from(refresh_token.into())),
            client,
        }
    }

    /// Current refresh token; changes when the server rotates it.
    pub fn refresh_token(&self) -> String {
        self.refresh_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expose_secret()
            .to_string()
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: OAuthClient> TokenGrant for RefreshTokenGrant<C> {
    fn fetch_token(&self) -> Result<OAuthTokenResponse> {
        let refresh_token = self.refresh_token();
        self.client.oauth2_refresh_token(&refresh_token)
    }

    fn on_token(&self, token: &TokenRecord) {
        if let Some(rotated) = token.refresh_token() {
            let mut current = self
                .refresh_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if current.expose_secret() != rotated {
                tracing::debug!(target: LOG_TARGET, "refresh token rotated");
                *current = SecretString::from(rotated.to_string());
            }
        }
    }

    fn name(&self) -> &str {
        "refresh_token"
    }
}

/// Obtains tokens for a confidential client's own identity.
pub struct ClientCredentialsGrant<C> {
    scopes: String,
    client: C,
}

impl<C: OAuthClient> ClientCredentialsGrant<C> {
    pub fn new(scopes: impl Into<String>, client: C) -> Self {
        Self {
            scopes: scopes.into(),
            client,
        }
    }

    pub fn scopes(&self) -> &str {
        &self.scopes
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: OAuthClient> TokenGrant for ClientCredentialsGrant<C> {
    fn fetch_token(&self) -> Result<OAuthTokenResponse> {
        self.client.oauth2_client_credentials_tokens(&self.scopes)
    }

    fn name(&self) -> &str {
        "client_credentials"
    }
}

/// Renewing authorizer backed by a refresh token.
pub type RefreshTokenAuthorizer<C> = RenewingAuthorizer<RefreshTokenGrant<C>>;

/// Renewing authorizer backed by client credentials.
pub type ClientCredentialsAuthorizer<C> = RenewingAuthorizer<ClientCredentialsGrant<C>>;

impl<C: OAuthClient> RenewingAuthorizer<RefreshTokenGrant<C>> {
    pub fn from_refresh_token(
        refresh_token: impl Into<String>,
        client: C,
        options: RenewingOptions,
    ) -> Result<Self> {
        Self::new(RefreshTokenGrant::new(refresh_token, client), options)
    }

    /// Current, possibly rotated, refresh token.
    pub fn refresh_token(&self) -> String {
        self.grant().refresh_token()
    }
}

impl<C: OAuthClient> RenewingAuthorizer<ClientCredentialsGrant<C>> {
    pub fn from_client_credentials(
        scopes: impl Into<String>,
        client: C,
        options: RenewingOptions,
    ) -> Result<Self> {
        Self::new(ClientCredentialsGrant::new(scopes, client), options)
    }
}
