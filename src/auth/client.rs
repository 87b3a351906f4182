//! OAuth2 token endpoint client.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use super::BasicAuthorizer;
use super::grants::OAuthClient;
use super::token::OAuthTokenResponse;
use crate::defaults;
use crate::error::{Result, TransportError};
use crate::transport::{Transport, TransportRequest, encoders};

const LOG_TARGET: &str = "sdk_transport::auth";

/// Talks to an OAuth2 authorization service's token endpoint.
///
/// Confidential clients authenticate with HTTP Basic using their secret. Native clients
/// have no secret and send their `client_id` in the form instead.
pub struct AuthClient {
    base_url: String,
    client_id: String,
    client_secret: Option<SecretString>,
    transport: Arc<Transport>,
}

impl AuthClient {
    pub fn confidential(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: Some(SecretString::from(client_secret.into())),
            transport,
        }
    }

    pub fn native(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        transport: Arc<Transport>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            transport,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    fn token_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            defaults::auth::TOKEN_PATH
        )
    }

    /// POST `form` to the token endpoint and decode the response.
    ///
    /// Non-2xx responses become [`TransportError::Api`].
    pub fn oauth2_token(&self, form: Map<String, Value>) -> Result<OAuthTokenResponse> {
        let grant_type = form
            .get("grant_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(target: LOG_TARGET, grant_type = %grant_type, "requesting tokens");

        let mut request = TransportRequest::post(self.token_url())
            .body(form)
            .encoding(encoders::FORM);
        if let Some(secret) = &self.client_secret {
            request = request.authorizer(Arc::new(BasicAuthorizer::new(
                &self.client_id,
                secret.expose_secret(),
            )));
        }

        let response = self.transport.request(request)?.error_for_status()?;
        let tokens = OAuthTokenResponse::from_response(&response)?;
        tracing::info!(
            target: LOG_TARGET,
            grant_type = %grant_type,
            tokens = tokens.len(),
            "received tokens"
        );
        Ok(tokens)
    }
}

impl OAuthClient for AuthClient {
    fn oauth2_refresh_token(&self, refresh_token: &str) -> Result<OAuthTokenResponse> {
        let mut form = Map::new();
        form.insert("grant_type".into(), "refresh_token".into());
        form.insert("refresh_token".into(), refresh_token.into());
        if self.client_secret.is_none() {
            form.insert("client_id".into(), self.client_id.clone().into());
        }
        self.oauth2_token(form)
    }

    fn oauth2_client_credentials_tokens(&self, scopes: &str) -> Result<OAuthTokenResponse> {
        if self.client_secret.is_none() {
            return Err(TransportError::usage(
                "the client credentials grant requires a confidential client",
            ));
        }
        let mut form = Map::new();
        form.insert("grant_type".into(), "client_credentials".into());
        form.insert("scope".into(), scopes.into());
        self.oauth2_token(form)
    }
}

impl fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("confidential", &self.is_confidential())
            .finish_non_exhaustive()
    }
}
