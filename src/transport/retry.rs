//! Retry context and check chain
//!
//! After every attempt the transport builds a [`RetryContext`] and asks a
//! [`RetryCheckRunner`] whether to send again. The runner walks an ordered list of
//! [`RetryCheck`]s; the first check that votes decides, and if none votes the answer is
//! "do not retry".
//!
//! Checks are plain trait objects, so any closure of the right shape is a check:
//!
//! ```rust,ignore
//! use sdk_transport::transport::{RetryCheckResult, RetryContext};
//!
//! let never_on_conflict = |ctx: &mut RetryContext| match ctx.response() {
//!     Some(r) if r.status_code() == 409 => RetryCheckResult::DoNotRetry,
//!     _ => RetryCheckResult::NoDecision,
//! };
//! ```

use std::collections::HashSet;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::response::HttpResponse;
use crate::auth::Authorizer;
use crate::error::SendError;

const LOG_TARGET: &str = "sdk_transport::retry";

/// Result of one physical send.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The server answered, with any status.
    Response(HttpResponse),
    /// The send failed at the network level.
    Error(SendError),
}

/// Everything a check may inspect about one attempt.
///
/// A fresh context is built after every attempt and dropped once the retry decision and
/// its sleep are done.
pub struct RetryContext {
    /// Zero-based attempt number within the logical request.
    pub attempt: u32,
    /// Authorizer used for the request, if any.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    pub outcome: AttemptOutcome,
    /// Set by a check to replace the computed backoff for this sleep only.
    pub backoff: Option<Duration>,
}

impl RetryContext {
    pub fn new(
        attempt: u32,
        authorizer: Option<Arc<dyn Authorizer>>,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            attempt,
            authorizer,
            outcome,
            backoff: None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match &self.outcome {
            AttemptOutcome::Response(r) => Some(r),
            AttemptOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SendError> {
        match &self.outcome {
            AttemptOutcome::Error(e) => Some(e),
            AttemptOutcome::Response(_) => None,
        }
    }

    pub fn into_outcome(self) -> AttemptOutcome {
        self.outcome
    }
}

impl fmt::Debug for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("attempt", &self.attempt)
            .field("has_authorizer", &self.authorizer.is_some())
            .field("outcome", &self.outcome)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// A check's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCheckResult {
    DoRetry,
    DoNotRetry,
    /// Defer to the next check.
    NoDecision,
}

/// Behavior flags attached to a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RetryCheckFlags(u8);

impl RetryCheckFlags {
    pub const NONE: Self = Self(0);
    /// Run at most once per logical request.
    pub const RUN_ONCE: Self = Self(1);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RetryCheckFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One link of the retry chain.
pub trait RetryCheck: Send + Sync {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult;

    fn flags(&self) -> RetryCheckFlags {
        RetryCheckFlags::NONE
    }

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> RetryCheck for F
where
    F: Fn(&mut RetryContext) -> RetryCheckResult + Send + Sync,
{
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        self(ctx)
    }
}

/// Attaches flags to a check that has none of its own.
#[derive(Debug, Clone)]
pub struct FlaggedCheck<C> {
    inner: C,
    flags: RetryCheckFlags,
}

impl<C: RetryCheck> FlaggedCheck<C> {
    pub fn new(inner: C, flags: RetryCheckFlags) -> Self {
        Self { inner, flags }
    }
}

impl<C: RetryCheck> RetryCheck for FlaggedCheck<C> {
    fn check(&self, ctx: &mut RetryContext) -> RetryCheckResult {
        self.inner.check(ctx)
    }

    fn flags(&self) -> RetryCheckFlags {
        self.flags | self.inner.flags()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Wrap `check` so it runs with `flags`.
pub fn with_flags<C: RetryCheck>(check: C, flags: RetryCheckFlags) -> FlaggedCheck<C> {
    FlaggedCheck::new(check, flags)
}

/// Resolves an ordered list of checks to a single retry decision.
///
/// Holds the run-once bookkeeping for one logical request, so a runner must not be
/// reused across requests.
pub struct RetryCheckRunner {
    checks: Vec<Arc<dyn RetryCheck>>,
    // identity of RUN_ONCE checks that already ran, keyed by Arc address
    ran: HashSet<usize>,
}

impl RetryCheckRunner {
    pub fn new(checks: &[Arc<dyn RetryCheck>]) -> Self {
        Self {
            checks: checks.to_vec(),
            ran: HashSet::new(),
        }
    }

    fn identity(check: &Arc<dyn RetryCheck>) -> usize {
        Arc::as_ptr(check).cast::<()>() as usize
    }

    pub fn should_retry(&mut self, ctx: &mut RetryContext) -> bool {
        for check in &self.checks {
            if check.flags().contains(RetryCheckFlags::RUN_ONCE) {
                let id = Self::identity(check);
                if self.ran.contains(&id) {
                    tracing::debug!(
                        target: LOG_TARGET,
                        check = check.name(),
                        "run-once check already ran, skipping"
                    );
                    continue;
                }
                self.ran.insert(id);
            }

            let result = check.check(ctx);
            tracing::debug!(
                target: LOG_TARGET,
                check = check.name(),
                attempt = ctx.attempt,
                ?result,
                "ran retry check"
            );
            match result {
                RetryCheckResult::DoRetry => return true,
                RetryCheckResult::DoNotRetry => return false,
                RetryCheckResult::NoDecision => {}
            }
        }
        tracing::debug!(target: LOG_TARGET, "no retry check decided, not retrying");
        false
    }
}

impl fmt::Debug for RetryCheckRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCheckRunner")
            .field(
                "checks",
                &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("ran", &self.ran.len())
            .finish()
    }
}

/// Backoff function: maps a context to a sleep before the next attempt.
pub type BackoffFn = Arc<dyn Fn(&RetryContext) -> Duration + Send + Sync>;

/// Exponential backoff with jitter: `(0.25 + 0.5 * rand) * 2^attempt` seconds.
///
/// A backoff set on the context by a check is used as is.
pub fn exponential_backoff(ctx: &RetryContext) -> Duration {
    if let Some(backoff) = ctx.backoff {
        return backoff;
    }
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let exp = ctx.attempt.min(30) as i32;
    Duration::from_secs_f64((0.25 + 0.5 * jitter) * 2f64.powi(exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response_ctx(attempt: u32, status: u16) -> RetryContext {
        let resp = HttpResponse::buffered(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            Vec::new(),
        );
        RetryContext::new(attempt, None, AttemptOutcome::Response(resp))
    }

    fn fixed(result: RetryCheckResult) -> Arc<dyn RetryCheck> {
        Arc::new(move |_: &mut RetryContext| result)
    }

    #[test]
    fn first_decisive_check_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = calls.clone();
            Arc::new(move |_: &mut RetryContext| {
                calls.fetch_add(1, Ordering::SeqCst);
                RetryCheckResult::DoRetry
            }) as Arc<dyn RetryCheck>
        };
        let mut runner = RetryCheckRunner::new(&[
            fixed(RetryCheckResult::NoDecision),
            fixed(RetryCheckResult::DoNotRetry),
            counted,
        ]);
        assert!(!runner.should_retry(&mut response_ctx(0, 500)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_decision_fails_closed() {
        let mut runner = RetryCheckRunner::new(&[
            fixed(RetryCheckResult::NoDecision),
            fixed(RetryCheckResult::NoDecision),
        ]);
        assert!(!runner.should_retry(&mut response_ctx(0, 500)));
        assert!(!RetryCheckRunner::new(&[]).should_retry(&mut response_ctx(0, 500)));
    }

    #[test]
    fn run_once_check_is_skipped_after_first_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let once: Arc<dyn RetryCheck> = {
            let calls = calls.clone();
            Arc::new(with_flags(
                move |_: &mut RetryContext| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    RetryCheckResult::DoRetry
                },
                RetryCheckFlags::RUN_ONCE,
            ))
        };
        let mut runner = RetryCheckRunner::new(&[once.clone()]);
        assert!(runner.should_retry(&mut response_ctx(0, 401)));
        assert!(!runner.should_retry(&mut response_ctx(1, 401)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // a new runner (new logical request) runs it again
        let mut runner = RetryCheckRunner::new(&[once]);
        assert!(runner.should_retry(&mut response_ctx(0, 401)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn checks_can_set_backoff() {
        let check: Arc<dyn RetryCheck> = Arc::new(|ctx: &mut RetryContext| {
            ctx.backoff = Some(Duration::from_secs(3));
            RetryCheckResult::DoRetry
        });
        let mut ctx = response_ctx(4, 503);
        assert!(RetryCheckRunner::new(&[check]).should_retry(&mut ctx));
        assert_eq!(exponential_backoff(&ctx), Duration::from_secs(3));
    }

    #[test]
    fn exponential_backoff_range() {
        for attempt in 0..6 {
            let ctx = response_ctx(attempt, 500);
            let base = 2f64.powi(attempt as i32);
            let secs = exponential_backoff(&ctx).as_secs_f64();
            assert!(secs >= 0.25 * base - 1e-9, "attempt {attempt}: {secs}");
            assert!(secs <= 0.75 * base + 1e-9, "attempt {attempt}: {secs}");
        }
    }

    #[test]
    fn flags_combine() {
        let flags = RetryCheckFlags::NONE | RetryCheckFlags::RUN_ONCE;
        assert!(flags.contains(RetryCheckFlags::RUN_ONCE));
        assert!(!RetryCheckFlags::NONE.contains(RetryCheckFlags::RUN_ONCE));
    }

    #[test]
    fn context_exposes_error() {
        let ctx = RetryContext::new(
            0,
            None,
            AttemptOutcome::Error(SendError::new(NetworkErrorKind::Timeout, "slow")),
        );
        assert!(ctx.response().is_none());
        assert_eq!(ctx.error().map(SendError::kind), Some(NetworkErrorKind::Timeout));
    }
}
