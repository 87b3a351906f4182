//! HTTP session abstraction
//!
//! [`HttpSession`] is the only point where the transport touches the network. The
//! production implementation wraps a blocking `reqwest` client; tests substitute a
//! scripted session.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use super::request::PreparedRequest;
use super::response::HttpResponse;
use crate::error::{NetworkErrorKind, SendError, TransportError};

const LOG_TARGET: &str = "sdk_transport::transport";

/// Per-send options resolved by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
    pub verify_ssl: bool,
    pub allow_redirects: bool,
    /// Leave the body on the connection instead of buffering it.
    pub stream: bool,
}

/// Sends one prepared request.
///
/// Implementations must be safe to share across threads: one session serves every
/// concurrent logical request of a transport. A network-level failure, including a
/// failure to read a non-streaming body, is reported as a [`SendError`]; any HTTP status
/// is a successful send.
pub trait HttpSession: Send + Sync {
    /// Called once per logical request, before the first send.
    ///
    /// Setup failures such as an unbuildable client are configuration errors and are
    /// never retried.
    fn prepare(&self, _options: &SendOptions) -> crate::error::Result<()> {
        Ok(())
    }

    fn send(
        &self,
        request: &PreparedRequest,
        options: &SendOptions,
    ) -> Result<HttpResponse, SendError>;
}

/// Blocking `reqwest` session.
///
/// TLS verification and redirect handling are client-level settings in reqwest, so
/// one client is kept per combination and built on first use.
#[derive(Debug, Default)]
pub struct ReqwestSession {
    clients: [OnceLock<Client>; 4],
}

impl ReqwestSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, verify_ssl: bool, allow_redirects: bool) -> crate::error::Result<Client> {
        let slot = &self.clients[usize::from(verify_ssl) * 2 + usize::from(allow_redirects)];
        if let Some(client) = slot.get() {
            return Ok(client.clone());
        }

        tracing::debug!(
            target: LOG_TARGET,
            verify_ssl,
            allow_redirects,
            "building HTTP client"
        );
        let policy = if allow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .redirect(policy)
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| {
                TransportError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        // a concurrent builder may have won; either client is equivalent
        let _ = slot.set(client.clone());
        Ok(client)
    }
}

impl HttpSession for ReqwestSession {
    fn prepare(&self, options: &SendOptions) -> crate::error::Result<()> {
        self.client(options.verify_ssl, options.allow_redirects).map(drop)
    }

    fn send(
        &self,
        request: &PreparedRequest,
        options: &SendOptions,
    ) -> Result<HttpResponse, SendError> {
        // already built by `prepare`
        let client = self
            .client(options.verify_ssl, options.allow_redirects)
            .map_err(|e| SendError::new(NetworkErrorKind::Other, e.to_string()))?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send()?;
        if options.stream {
            return Ok(HttpResponse::streaming(response));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes()?;
        Ok(HttpResponse::buffered(status, headers, body.to_vec()).with_url(url))
    }
}
