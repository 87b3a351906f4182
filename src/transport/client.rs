//! Transport: the retrying request loop
//!
//! A [`Transport`] owns an [`HttpSession`], the named encoders, the retry check chain and
//! the backoff settings. [`Transport::request`] encodes a request once and sends it up to
//! `max_retries + 1` times, consulting a fresh [`RetryCheckRunner`] after each attempt.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sdk_transport::transport::{Transport, TransportRequest};
//!
//! let transport = Transport::builder().app_name("my-app").build()?;
//! let response = transport.request(
//!     TransportRequest::get("https://transfer.api.example.org/v0.10/task_list")
//!         .query_param("limit", 10)
//!         .authorizer(authorizer.clone()),
//! )?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use super::checks::{
    ExpiredAuthorizationCheck, RequestExceptionCheck, RetryAfterCheck, TransientErrorCheck,
};
use super::encoders::{self, FormEncoder, JsonEncoder, RequestEncoder, TextEncoder};
use super::request::{PreparedRequest, TransportRequest};
use super::response::HttpResponse;
use super::retry::{
    AttemptOutcome, BackoffFn, RetryCheck, RetryCheckRunner, RetryContext, exponential_backoff,
};
use super::session::{HttpSession, ReqwestSession, SendOptions};
use crate::auth::Authorizer;
use crate::config;
use crate::defaults;
use crate::error::{Result, TransportError};

const LOG_TARGET: &str = "sdk_transport::transport";

/// Settings that may be changed temporarily with [`Transport::tune`].
#[derive(Clone)]
struct TransportSettings {
    verify_ssl: bool,
    http_timeout: Option<Duration>,
    retry_backoff: BackoffFn,
    max_sleep: Duration,
    max_retries: u32,
}

impl TransportSettings {
    fn sleep_for(&self, ctx: &RetryContext) -> Duration {
        (self.retry_backoff)(ctx).min(self.max_sleep)
    }
}

impl fmt::Debug for TransportSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSettings")
            .field("verify_ssl", &self.verify_ssl)
            .field("http_timeout", &self.http_timeout)
            .field("max_sleep", &self.max_sleep)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Retrying HTTP transport.
///
/// Safe to share between threads. Every call to [`request`](Self::request) has its own
/// retry state; only the session and the settings are shared.
pub struct Transport {
    session: Arc<dyn HttpSession>,
    settings: RwLock<TransportSettings>,
    encoders: HashMap<String, Arc<dyn RequestEncoder>>,
    retry_checks: Vec<Arc<dyn RetryCheck>>,
    caller_checks: usize,
    user_agent: String,
}

impl Transport {
    /// Transport with default settings, reading TLS and timeout defaults from the
    /// environment.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    fn settings(&self) -> TransportSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_settings(&self, settings: TransportSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn verify_ssl(&self) -> bool {
        self.settings().verify_ssl
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.settings().http_timeout
    }

    pub fn max_sleep(&self) -> Duration {
        self.settings().max_sleep
    }

    pub fn max_retries(&self) -> u32 {
        self.settings().max_retries
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Retry checks in the order they run.
    pub fn retry_checks(&self) -> &[Arc<dyn RetryCheck>] {
        &self.retry_checks
    }

    /// Add a check that runs after previously registered caller checks but before the
    /// default checks.
    pub fn register_retry_check<C: RetryCheck + 'static>(&mut self, check: C) {
        self.retry_checks.insert(self.caller_checks, Arc::new(check));
        self.caller_checks += 1;
    }

    /// Override settings until the returned guard is dropped.
    ///
    /// Requests already in flight keep the settings they started with.
    pub fn tune(&self, options: TuneOptions) -> TuneGuard<'_> {
        let saved = self.settings();
        let mut tuned = saved.clone();
        if let Some(v) = options.verify_ssl {
            tuned.verify_ssl = v;
        }
        if let Some(v) = options.http_timeout {
            tuned.http_timeout = v;
        }
        if let Some(v) = options.retry_backoff {
            tuned.retry_backoff = v;
        }
        if let Some(v) = options.max_sleep {
            tuned.max_sleep = v;
        }
        if let Some(v) = options.max_retries {
            tuned.max_retries = v;
        }
        tracing::debug!(target: LOG_TARGET, settings = ?tuned, "tuning transport");
        self.replace_settings(tuned);
        TuneGuard {
            transport: self,
            saved: Some(saved),
        }
    }

    fn base_headers(&self, extra: &[(String, String)]) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(defaults::http::ACCEPT));
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| TransportError::usage(format!("invalid User-Agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        for (name, value) in extra {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::usage(format!("invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::usage(format!("invalid value for header '{name}': {e}")))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    fn encode(&self, request: &TransportRequest) -> Result<PreparedRequest> {
        let encoding = request
            .encoding
            .as_deref()
            .unwrap_or_else(|| encoders::infer_encoding(&request.data));
        let encoder = self.encoders.get(encoding).ok_or_else(|| {
            TransportError::usage(format!("unknown request encoding: '{encoding}'"))
        })?;
        let headers = self.base_headers(&request.headers)?;
        encoder.encode(
            &request.method,
            &request.url,
            &request.query_params,
            &request.data,
            &headers,
        )
    }

    fn set_authorization(prepared: &mut PreparedRequest, authorizer: &dyn Authorizer) -> Result<()> {
        match authorizer.authorization_header()? {
            Some(value) if !value.is_empty() => {
                let mut value = HeaderValue::from_str(&value).map_err(|_| {
                    TransportError::usage("authorizer produced an invalid Authorization header")
                })?;
                value.set_sensitive(true);
                prepared.headers.insert(AUTHORIZATION, value);
            }
            _ => {
                prepared.headers.remove(AUTHORIZATION);
            }
        }
        Ok(())
    }

    /// Send a request, retrying as the check chain decides.
    ///
    /// Returns the last response when the chain stops retrying or retries run out,
    /// whatever its status. A network failure is returned as
    /// [`TransportError::Network`] once it is no longer retried. Encoding errors, session
    /// setup errors and authorizer failures are returned immediately.
    pub fn request(&self, request: TransportRequest) -> Result<HttpResponse> {
        let settings = self.settings();
        let mut prepared = self.encode(&request)?;
        let options = SendOptions {
            timeout: settings.http_timeout,
            verify_ssl: settings.verify_ssl,
            allow_redirects: request.allow_redirects,
            stream: request.stream,
        };
        self.session.prepare(&options)?;
        let mut runner = RetryCheckRunner::new(&self.retry_checks);

        tracing::debug!(
            target: LOG_TARGET,
            method = %prepared.method,
            url = %prepared.url,
            "starting request"
        );

        let mut attempt: u32 = 0;
        loop {
            if let Some(authorizer) = &request.authorizer {
                Self::set_authorization(&mut prepared, authorizer.as_ref())?;
            }

            tracing::debug!(target: LOG_TARGET, attempt, "sending request");
            let outcome = match self.session.send(&prepared, &options) {
                Ok(response) => AttemptOutcome::Response(response),
                Err(err) => AttemptOutcome::Error(err),
            };
            let mut ctx = RetryContext::new(attempt, request.authorizer.clone(), outcome);
            let last = attempt >= settings.max_retries;

            // a failed send on the last attempt is raised without consulting the checks
            let retry = if last && ctx.error().is_some() {
                false
            } else {
                runner.should_retry(&mut ctx)
            };

            if !retry || last {
                return match ctx.into_outcome() {
                    AttemptOutcome::Response(response) => {
                        if retry {
                            tracing::warn!(
                                target: LOG_TARGET,
                                status = response.status_code(),
                                attempts = attempt + 1,
                                "retries exhausted, returning last response"
                            );
                        } else {
                            tracing::info!(
                                target: LOG_TARGET,
                                status = response.status_code(),
                                attempts = attempt + 1,
                                "request completed"
                            );
                        }
                        Ok(response)
                    }
                    AttemptOutcome::Error(err) => {
                        tracing::warn!(
                            target: LOG_TARGET,
                            attempts = attempt + 1,
                            error = %err,
                            "request failed"
                        );
                        Err(err.into())
                    }
                };
            }

            let sleep = settings.sleep_for(&ctx);
            tracing::info!(
                target: LOG_TARGET,
                attempt,
                sleep_secs = sleep.as_secs_f64(),
                "retrying request after backoff"
            );
            drop(ctx);
            std::thread::sleep(sleep);
            attempt += 1;
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoders: Vec<&str> = self.encoders.keys().map(String::as_str).collect();
        encoders.sort_unstable();
        f.debug_struct("Transport")
            .field("settings", &self.settings())
            .field("encoders", &encoders)
            .field(
                "retry_checks",
                &self.retry_checks.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Transport`].
pub struct TransportBuilder {
    session: Option<Arc<dyn HttpSession>>,
    verify_ssl: Option<bool>,
    http_timeout: Option<Option<Duration>>,
    retry_backoff: Option<BackoffFn>,
    max_sleep: Duration,
    max_retries: u32,
    app_name: Option<String>,
    encoders: Vec<(String, Arc<dyn RequestEncoder>)>,
    retry_checks: Vec<Arc<dyn RetryCheck>>,
    retry_after_status_codes: Vec<u16>,
    transient_error_status_codes: Vec<u16>,
    expired_authorization_status_codes: Vec<u16>,
    non_transient_error_codes: Vec<String>,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            session: None,
            verify_ssl: None,
            http_timeout: None,
            retry_backoff: None,
            max_sleep: defaults::retry::MAX_SLEEP,
            max_retries: defaults::retry::MAX_RETRIES,
            app_name: None,
            encoders: Vec::new(),
            retry_checks: Vec::new(),
            retry_after_status_codes: defaults::retry::RETRY_AFTER_STATUS_CODES.to_vec(),
            transient_error_status_codes: defaults::retry::TRANSIENT_ERROR_STATUS_CODES.to_vec(),
            expired_authorization_status_codes: defaults::retry::EXPIRED_AUTHORIZATION_STATUS_CODES
                .to_vec(),
            non_transient_error_codes: Vec::new(),
        }
    }
}

impl TransportBuilder {
    /// Use a custom session instead of the blocking reqwest one.
    pub fn session(mut self, session: Arc<dyn HttpSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = Some(verify);
        self
    }

    /// `None` disables the timeout.
    pub fn http_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn retry_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(&RetryContext) -> Duration + Send + Sync + 'static,
    {
        self.retry_backoff = Some(Arc::new(backoff));
        self
    }

    pub fn max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Appended to the `User-Agent` header.
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Register an encoder under `name`, replacing a built-in one of the same name.
    pub fn encoder<E: RequestEncoder + 'static>(mut self, name: impl Into<String>, encoder: E) -> Self {
        self.encoders.push((name.into(), Arc::new(encoder)));
        self
    }

    /// Add a check that runs before the default checks.
    pub fn retry_check<C: RetryCheck + 'static>(mut self, check: C) -> Self {
        self.retry_checks.push(Arc::new(check));
        self
    }

    pub fn retry_after_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.retry_after_status_codes = codes.into();
        self
    }

    pub fn transient_error_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.transient_error_status_codes = codes.into();
        self
    }

    pub fn expired_authorization_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.expired_authorization_status_codes = codes.into();
        self
    }

    /// Do not retry transient statuses whose error `code` contains `code`.
    pub fn non_transient_error_code(mut self, code: impl Into<String>) -> Self {
        self.non_transient_error_codes.push(code.into());
        self
    }

    pub fn build(self) -> Result<Transport> {
        let verify_ssl = config::verify_ssl(self.verify_ssl)?;
        let http_timeout = config::http_timeout(self.http_timeout)?;

        let user_agent = match &self.app_name {
            Some(app) => format!("{}/{app}", defaults::http::BASE_USER_AGENT),
            None => defaults::http::BASE_USER_AGENT.to_string(),
        };

        let mut encoders: HashMap<String, Arc<dyn RequestEncoder>> = HashMap::new();
        encoders.insert(encoders::TEXT.to_string(), Arc::new(TextEncoder));
        encoders.insert(encoders::JSON.to_string(), Arc::new(JsonEncoder));
        encoders.insert(encoders::FORM.to_string(), Arc::new(FormEncoder));
        encoders.extend(self.encoders);

        let transient = self.non_transient_error_codes.into_iter().fold(
            TransientErrorCheck::new(self.transient_error_status_codes),
            TransientErrorCheck::with_non_transient_error_code,
        );
        let caller_checks = self.retry_checks.len();
        let mut retry_checks = self.retry_checks;
        retry_checks.push(Arc::new(ExpiredAuthorizationCheck::new(
            self.expired_authorization_status_codes,
        )));
        retry_checks.push(Arc::new(RequestExceptionCheck));
        retry_checks.push(Arc::new(RetryAfterCheck::new(self.retry_after_status_codes)));
        retry_checks.push(Arc::new(transient));

        let settings = TransportSettings {
            verify_ssl,
            http_timeout,
            retry_backoff: self
                .retry_backoff
                .unwrap_or_else(|| Arc::new(exponential_backoff) as BackoffFn),
            max_sleep: self.max_sleep,
            max_retries: self.max_retries,
        };

        Ok(Transport {
            session: self
                .session
                .unwrap_or_else(|| Arc::new(ReqwestSession::new()) as Arc<dyn HttpSession>),
            settings: RwLock::new(settings),
            encoders,
            retry_checks,
            caller_checks,
            user_agent,
        })
    }
}

/// Temporary overrides for [`Transport::tune`]. Unset fields are left unchanged.
#[derive(Default, Clone)]
pub struct TuneOptions {
    verify_ssl: Option<bool>,
    http_timeout: Option<Option<Duration>>,
    retry_backoff: Option<BackoffFn>,
    max_sleep: Option<Duration>,
    max_retries: Option<u32>,
}

impl TuneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = Some(verify);
        self
    }

    pub fn http_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn retry_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(&RetryContext) -> Duration + Send + Sync + 'static,
    {
        self.retry_backoff = Some(Arc::new(backoff));
        self
    }

    pub fn max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = Some(max_sleep);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Restores the settings saved by [`Transport::tune`] when dropped.
#[must_use = "settings are restored as soon as the guard is dropped"]
pub struct TuneGuard<'a> {
    transport: &'a Transport,
    saved: Option<TransportSettings>,
}

impl Drop for TuneGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            tracing::debug!(target: LOG_TARGET, settings = ?saved, "restoring transport settings");
            self.transport.replace_settings(saved);
        }
    }
}
