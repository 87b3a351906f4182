//! OAuth2 token responses
//!
//! A token response carries one top-level token plus any number of `other_tokens`, one
//! per resource server. [`OAuthTokenResponse`] indexes them by resource server and
//! converts each `expires_in` into an absolute expiry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::transport::HttpResponse;

#[derive(Deserialize)]
struct RawToken {
    scope: String,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: i64,
    resource_server: String,
    #[serde(default)]
    other_tokens: Vec<RawToken>,
}

/// Token data for one resource server.
pub struct TokenRecord {
    pub resource_server: String,
    /// Space-separated scopes covered by the token.
    pub scope: String,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    pub token_type: Option<String>,
    /// Absolute expiry, in seconds since the Unix epoch.
    pub expires_at_seconds: i64,
}

impl TokenRecord {
    fn from_raw(raw: RawToken, now: i64) -> Self {
        Self {
            resource_server: raw.resource_server,
            scope: raw.scope,
            access_token: SecretString::from(raw.access_token),
            refresh_token: raw.refresh_token.map(SecretString::from),
            token_type: raw.token_type,
            expires_at_seconds: now.saturating_add(raw.expires_in),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret())
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("resource_server", &self.resource_server)
            .field("scope", &self.scope)
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at_seconds", &self.expires_at_seconds)
            .finish()
    }
}

/// A decoded token endpoint response.
pub struct OAuthTokenResponse {
    raw: Value,
    by_resource_server: BTreeMap<String, TokenRecord>,
}

impl OAuthTokenResponse {
    /// Decode a token response received now.
    pub fn from_json(raw: Value) -> Result<Self> {
        Self::from_json_at(raw, chrono::Utc::now().timestamp())
    }

    /// Decode a token response received at `now` (Unix seconds).
    pub fn from_json_at(raw: Value, now: i64) -> Result<Self> {
        let mut top: RawToken = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Parse(format!("invalid token response: {e}")))?;
        let others = std::mem::take(&mut top.other_tokens);

        let mut by_resource_server = BTreeMap::new();
        for token in std::iter::once(top).chain(others) {
            let record = TokenRecord::from_raw(token, now);
            by_resource_server.insert(record.resource_server.clone(), record);
        }
        Ok(Self {
            raw,
            by_resource_server,
        })
    }

    pub fn from_response(response: &HttpResponse) -> Result<Self> {
        Self::from_json(response.json()?)
    }

    /// The response body as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn by_resource_server(&self) -> &BTreeMap<String, TokenRecord> {
        &self.by_resource_server
    }

    /// The single token covering every scope in the space-separated `scopes`.
    ///
    /// `None` if any scope is unknown, or if the scopes span several tokens.
    pub fn by_scopes(&self, scopes: &str) -> Option<&TokenRecord> {
        let mut matched: BTreeSet<&str> = BTreeSet::new();
        for scope in scopes.split_whitespace() {
            let record = self
                .by_resource_server
                .values()
                .find(|r| r.scopes().any(|s| s == scope))?;
            matched.insert(record.resource_server.as_str());
        }
        let mut matched = matched.into_iter();
        match (matched.next(), matched.next()) {
            (Some(rs), None) => self.by_resource_server.get(rs),
            _ => None,
        }
    }

    /// The only token in the response.
    ///
    /// Fails when the response holds zero or several tokens; an authorizer is scoped to a
    /// single resource server.
    pub fn single_token(&self) -> Result<&TokenRecord> {
        let mut tokens = self.by_resource_server.values();
        match (tokens.next(), tokens.next()) {
            (Some(token), None) => Ok(token),
            _ => Err(TransportError::usage(format!(
                "token response contained {} tokens, expected exactly one",
                self.by_resource_server.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.by_resource_server.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource_server.is_empty()
    }
}

impl fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("by_resource_server", &self.by_resource_server)
            .finish_non_exhaustive()
    }
}
