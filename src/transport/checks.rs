//! Default retry checks
//!
//! The transport registers these after any caller-supplied checks, in this order:
//! [`ExpiredAuthorizationCheck`], [`RequestExceptionCheck`], [`RetryAfterCheck`],
//! [`TransientErrorCheck`].

use std::time::Duration;

use serde_json::Value;

use super::response::HttpResponse;
use super::retry::{RetryCheck, RetryCheckFlags, RetryCheckResult, RetryContext};
use crate::defaults;

const LOG_TARGET: &str = "sdk_transport::retry";

/// Lets the authorizer react to a 401 and retries if it did something about it.
///
/// Runs at most once per logical request, so a second 401 after a renewal falls through
/// instead of looping.
#[derive(Debug, Clone)]
pub struct ExpiredAuthorizationCheck {
    status_codes: Vec<u16>,
}

impl ExpiredAuthorizationCheck {
    pub fn new(status_codes: impl Into<Vec<u16>>) -> Self {
        Self {
            status_codes: status_codes.into(),
        }
    }
}

impl Default for ExpiredAuthorizationCheck {
    fn default() -> Self {
        Self::new(defaults::retry::EXPIRED_AUTHORIZATION_STATUS_CODES)
    }
}

impl RetryCheck for ExpiredAuthorizationCheck {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        let Some(response) = ctx.response() else {
            return RetryCheckResult::NoDecision;
        };
        if !self.status_codes.contains(&response.status_code()) {
            return RetryCheckResult::NoDecision;
        }
        let Some(authorizer) = &ctx.authorizer else {
            return RetryCheckResult::NoDecision;
        };
        if authorizer.handle_missing_authorization() {
            tracing::debug!(
                target: LOG_TARGET,
                "authorizer handled missing authorization, retrying"
            );
            RetryCheckResult::DoRetry
        } else {
            RetryCheckResult::NoDecision
        }
    }

    fn flags(&self) -> RetryCheckFlags {
        RetryCheckFlags::RUN_ONCE
    }

    fn name(&self) -> &str {
        "expired_authorization"
    }
}

/// Retries every network-level send failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestExceptionCheck;

impl RetryCheck for RequestExceptionCheck {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        match ctx.error() {
            Some(err) => {
                tracing::debug!(target: LOG_TARGET, kind = %err.kind(), "request error, retrying");
                RetryCheckResult::DoRetry
            }
            None => RetryCheckResult::NoDecision,
        }
    }

    fn name(&self) -> &str {
        "request_exception"
    }
}

/// Honors an integer `Retry-After` header on throttling responses.
#[derive(Debug, Clone)]
pub struct RetryAfterCheck {
    status_codes: Vec<u16>,
}

impl RetryAfterCheck {
    pub fn new(status_codes: impl Into<Vec<u16>>) -> Self {
        Self {
            status_codes: status_codes.into(),
        }
    }
}

impl Default for RetryAfterCheck {
    fn default() -> Self {
        Self::new(defaults::retry::RETRY_AFTER_STATUS_CODES)
    }
}

impl RetryCheck for RetryAfterCheck {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        let backoff = match ctx.response() {
            Some(r) if self.status_codes.contains(&r.status_code()) => parse_retry_after(r),
            _ => None,
        };
        match backoff {
            Some(backoff) => {
                ctx.backoff = Some(backoff);
                RetryCheckResult::DoRetry
            }
            None => RetryCheckResult::NoDecision,
        }
    }

    fn name(&self) -> &str {
        "retry_after"
    }
}

/// Integer seconds from a `Retry-After` header. HTTP-date values are not supported.
pub fn parse_retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("Retry-After")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Retries responses with a transient status.
///
/// Responses whose JSON `code` contains one of the configured non-transient error codes
/// are left undecided: they report a failure in a downstream system, which retrying
/// against this service will not fix.
#[derive(Debug, Clone)]
pub struct TransientErrorCheck {
    status_codes: Vec<u16>,
    non_transient_error_codes: Vec<String>,
}

impl TransientErrorCheck {
    pub fn new(status_codes: impl Into<Vec<u16>>) -> Self {
        Self {
            status_codes: status_codes.into(),
            non_transient_error_codes: Vec::new(),
        }
    }

    /// Never retry responses whose error code contains `code`.
    pub fn with_non_transient_error_code(mut self, code: impl Into<String>) -> Self {
        self.non_transient_error_codes.push(code.into());
        self
    }

    fn is_non_transient(&self, response: &HttpResponse) -> bool {
        if self.non_transient_error_codes.is_empty() {
            return false;
        }
        let Some(body) = response.json_value() else {
            return false;
        };
        let Some(code) = body.get("code").and_then(Value::as_str) else {
            return false;
        };
        self.non_transient_error_codes
            .iter()
            .any(|c| code.contains(c.as_str()))
    }
}

impl Default for TransientErrorCheck {
    fn default() -> Self {
        Self::new(defaults::retry::TRANSIENT_ERROR_STATUS_CODES)
    }
}

impl RetryCheck for TransientErrorCheck {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        let Some(response) = ctx.response() else {
            return RetryCheckResult::NoDecision;
        };
        if !self.status_codes.contains(&response.status_code()) {
            return RetryCheckResult::NoDecision;
        }
        if self.is_non_transient(response) {
            tracing::debug!(
                target: LOG_TARGET,
                status = response.status_code(),
                "error originates downstream, not retrying as transient"
            );
            return RetryCheckResult::NoDecision;
        }
        RetryCheckResult::DoRetry
    }

    fn name(&self) -> &str {
        "transient_error"
    }
}
