//! Error Handling Module
//!
//! Two layers of errors live here:
//! - [`SendError`]: what an [`HttpSession`](crate::transport::HttpSession) reports when a
//!   single physical send fails. It is stored in a retry context and inspected by checks.
//! - [`TransportError`]: what callers of the transport ever see. Session failures are
//!   converted into [`TransportError::Network`] before they leave the retry loop, so the
//!   underlying HTTP client's error type never escapes.

use std::fmt;

use thiserror::Error;

/// Boxed error used to carry underlying causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Classification of a network-level failure.
///
/// Connect timeouts are distinguished from other timeouts because they are always
/// safe to retry: the request never reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkErrorKind {
    /// The request timed out while establishing the connection.
    ConnectTimeout,
    /// The request timed out after the connection was established.
    Timeout,
    /// The connection could not be established or was dropped.
    Connection,
    /// Any other failure while sending or reading the response.
    Other,
}

impl NetworkErrorKind {
    pub const fn is_timeout(self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::Timeout)
    }

    /// True when the request certainly never reached the server.
    pub const fn is_retry_safe(self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::Connection)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ConnectTimeout => "ConnectTimeoutError",
            Self::Timeout => "TimeoutError",
            Self::Connection => "ConnectionError",
            Self::Other => "NetworkError",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A failure to complete one physical HTTP send.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct SendError {
    kind: NetworkErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl SendError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> NetworkErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        // connect timeouts first: they satisfy both is_connect and is_timeout
        let kind = if err.is_connect() && err.is_timeout() {
            NetworkErrorKind::ConnectTimeout
        } else if err.is_timeout() {
            NetworkErrorKind::Timeout
        } else if err.is_connect() {
            NetworkErrorKind::Connection
        } else {
            NetworkErrorKind::Other
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

/// Errors surfaced by the transport and the authorizers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A network-level send failure (connection refused, DNS failure, timeout).
    #[error("{kind} on request: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The caller supplied something the transport cannot work with.
    #[error("Usage error: {0}")]
    Usage(String),

    /// A REST API answered with a non-success status.
    #[error("API error ({status}, {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        body: Option<serde_json::Value>,
    },

    /// A response body could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration (environment values, HTTP client setup).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TransportError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Network failure kind, if this is a converted send failure.
    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<SendError> for TransportError {
    fn from(err: SendError) -> Self {
        Self::Network {
            kind: err.kind,
            message: err.message,
            source: err.source,
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
