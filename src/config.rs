//! Environment-backed defaults.
//!
//! TLS verification and the HTTP timeout may be configured process-wide through
//! environment variables. An explicit value passed by the caller always takes
//! precedence over the environment, which in turn takes precedence over the
//! built-in default.

use std::time::Duration;

use crate::defaults;
use crate::error::{Result, TransportError};

const LOG_TARGET: &str = "sdk_transport::config";

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Parse a human-friendly truth value.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(TransportError::Configuration(format!(
            "invalid truth value: {other}"
        ))),
    }
}

/// Resolve whether TLS certificates are verified.
pub fn verify_ssl(explicit: Option<bool>) -> Result<bool> {
    verify_ssl_with(explicit, env_lookup)
}

/// Same as [`verify_ssl`], reading the environment through `lookup`.
pub fn verify_ssl_with<F>(explicit: Option<bool>, lookup: F) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let var = defaults::env::VERIFY_SSL_VAR;
    let value = match explicit {
        Some(v) => v,
        None => match lookup(var) {
            Some(raw) => parse_bool(&raw)?,
            None => true,
        },
    };
    log_setting(var, value, true);
    Ok(value)
}

/// Resolve the HTTP timeout. `Ok(None)` means requests never time out.
///
/// `explicit` is `Some(None)` when the caller explicitly disabled the timeout.
pub fn http_timeout(explicit: Option<Option<Duration>>) -> Result<Option<Duration>> {
    http_timeout_with(explicit, env_lookup)
}

/// Same as [`http_timeout`], reading the environment through `lookup`.
pub fn http_timeout_with<F>(
    explicit: Option<Option<Duration>>,
    lookup: F,
) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    let var = defaults::env::HTTP_TIMEOUT_VAR;
    let default = Some(defaults::http::REQUEST_TIMEOUT);
    let value = match explicit {
        Some(v) => v,
        None => match lookup(var) {
            Some(raw) => parse_timeout(&raw)?,
            None => default,
        },
    };
    log_setting(var, value, default);
    Ok(value)
}

fn parse_timeout(raw: &str) -> Result<Option<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Some(defaults::http::REQUEST_TIMEOUT));
    }
    let secs: f64 = raw.parse().map_err(|_| {
        tracing::error!(target: LOG_TARGET, value = raw, "value can't be parsed as a timeout");
        TransportError::Configuration(format!("invalid config float: {raw}"))
    })?;
    if secs == -1.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| TransportError::Configuration(format!("invalid timeout {raw}: {e}")))
}

// only non-default *values* are logged at info
fn log_setting<T: PartialEq + std::fmt::Debug>(name: &str, value: T, default: T) {
    if value != default {
        tracing::info!(target: LOG_TARGET, "on lookup, non-default setting: {name}={value:?}");
    } else {
        tracing::debug!(target: LOG_TARGET, "on lookup, default setting: {name}={value:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |_| Some(value.to_string())
    }

    fn empty_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for v in ["y", "YES", "t", "True", "on", "1"] {
            assert!(parse_bool(v).unwrap(), "{v}");
        }
        for v in ["n", "No", "f", "FALSE", "off", "0"] {
            assert!(!parse_bool(v).unwrap(), "{v}");
        }
        assert!(matches!(
            parse_bool("maybe"),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn verify_ssl_precedence() {
        assert!(verify_ssl_with(None, empty_env).unwrap());
        assert!(!verify_ssl_with(None, env_with("off")).unwrap());
        // explicit wins over environment
        assert!(verify_ssl_with(Some(true), env_with("off")).unwrap());
        assert!(verify_ssl_with(None, env_with("garbage")).is_err());
    }

    #[test]
    fn http_timeout_defaults_and_env() {
        assert_eq!(
            http_timeout_with(None, empty_env).unwrap(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            http_timeout_with(None, env_with("2.5")).unwrap(),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(http_timeout_with(None, env_with("-1")).unwrap(), None);
        assert_eq!(
            http_timeout_with(None, env_with("")).unwrap(),
            Some(Duration::from_secs(60))
        );
        assert!(http_timeout_with(None, env_with("soon")).is_err());
    }

    #[test]
    fn explicit_timeout_wins() {
        assert_eq!(
            http_timeout_with(Some(Some(Duration::from_secs(5))), env_with("-1")).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            http_timeout_with(Some(None), env_with("30")).unwrap(),
            None
        );
    }
}
