//! Resilient HTTP transport
//!
//! - [`request`]: what callers describe, and the encoded request actually sent
//! - [`encoders`]: named body encoders (`text`, `json`, `form`)
//! - [`session`]: the network seam ([`HttpSession`]) and its reqwest implementation
//! - [`retry`]: retry context, check trait and the per-request check runner
//! - [`checks`]: the default retry checks
//! - [`client`]: [`Transport`], which ties them together in a bounded retry loop

pub mod checks;
pub mod client;
pub mod encoders;
pub mod request;
pub mod response;
pub mod retry;
pub mod session;

pub use checks::{
    ExpiredAuthorizationCheck, RequestExceptionCheck, RetryAfterCheck, TransientErrorCheck,
};
pub use client::{Transport, TransportBuilder, TuneGuard, TuneOptions};
pub use encoders::{FormEncoder, JsonEncoder, RequestEncoder, TextEncoder};
pub use request::{PreparedRequest, RequestBody, TransportRequest};
pub use response::{HttpResponse, ResponseBody};
pub use retry::{
    AttemptOutcome, BackoffFn, FlaggedCheck, RetryCheck, RetryCheckFlags, RetryCheckResult,
    RetryCheckRunner, RetryContext, exponential_backoff, with_flags,
};
pub use session::{HttpSession, ReqwestSession, SendOptions};
