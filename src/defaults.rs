//! Default Configuration Values
//!
//! This module centralizes the default values used by the transport and the
//! authorizers.

use std::time::Duration;

/// HTTP client defaults
pub mod http {
    use super::*;

    /// Default per-request timeout when neither the caller nor the environment sets one.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Identifier sent in every `User-Agent` header. An application name may be appended.
    pub const BASE_USER_AGENT: &str = concat!("sdk-transport-rs-", env!("CARGO_PKG_VERSION"));

    /// Value of the `Accept` header sent with every request.
    pub const ACCEPT: &str = "application/json";
}

/// Retry loop defaults
pub mod retry {
    use super::*;

    /// Maximum number of retries after the initial attempt.
    pub const MAX_RETRIES: u32 = 5;

    /// Upper bound on any single sleep between attempts.
    pub const MAX_SLEEP: Duration = Duration::from_secs(10);

    /// Status codes for responses which may carry a `Retry-After` header.
    pub const RETRY_AFTER_STATUS_CODES: &[u16] = &[429, 503];

    /// Status codes for error responses which should generally be retried.
    pub const TRANSIENT_ERROR_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

    /// Status codes indicating that authorization was missing or expired.
    pub const EXPIRED_AUTHORIZATION_STATUS_CODES: &[u16] = &[401];
}

/// Authorizer defaults
pub mod auth {
    /// Seconds subtracted from a token's expiry to renew it before the server rejects it.
    pub const EXPIRES_ADJUST_SECONDS: i64 = 60;

    /// Path of the OAuth2 token endpoint, relative to the auth service base URL.
    pub const TOKEN_PATH: &str = "/v2/oauth2/token";
}

/// Environment variables consulted for process-wide defaults
pub mod env {
    /// Enables or disables TLS certificate verification.
    pub const VERIFY_SSL_VAR: &str = "SDK_TRANSPORT_VERIFY_SSL";

    /// HTTP timeout in seconds; `-1` disables the timeout.
    pub const HTTP_TIMEOUT_VAR: &str = "SDK_TRANSPORT_HTTP_TIMEOUT";
}
