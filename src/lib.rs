//! sdk-transport
//!
//! Blocking HTTP transport for REST API clients: named request encoders, a pluggable
//! retry check chain with capped exponential backoff, and authorizers that renew their
//! own OAuth2 tokens when they expire or are rejected.
#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod defaults;
pub mod error;
pub mod telemetry;
pub mod transport;

pub use auth::{
    AccessTokenAuthorizer, AuthClient, Authorizer, BasicAuthorizer, ClientCredentialsAuthorizer,
    NullAuthorizer, RefreshTokenAuthorizer, RenewingAuthorizer, RenewingOptions,
};
pub use error::{NetworkErrorKind, Result, TransportError};
pub use transport::{
    HttpResponse, RequestBody, RetryCheck, RetryCheckResult, RetryContext, Transport,
    TransportRequest, TuneOptions,
};
