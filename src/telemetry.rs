//! Telemetry and tracing utilities
//!
//! The transport logs through `tracing` under the `sdk_transport` target prefix.
//! Libraries should not install a global subscriber themselves; applications that
//! do not already have one can use [`init_subscriber`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use sdk_transport::telemetry::{init_subscriber, SubscriberConfig, OutputFormat};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build();
//! init_subscriber(config)?;
//! ```

use tracing_subscriber::EnvFilter;

use crate::error::{Result, TransportError};

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Configuration for tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Level applied to the `sdk_transport` targets
    pub log_level: tracing::Level,
    /// Output format
    pub output_format: OutputFormat,
    /// Honor `RUST_LOG` when it is set
    pub respect_env: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            respect_env: true,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    /// Verbose configuration showing every attempt of the retry loop
    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        let fallback = || {
            let level = self.log_level.as_str().to_lowercase();
            EnvFilter::new(format!("sdk_transport={level}"))
        };
        if self.respect_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
        } else {
            fallback()
        }
    }
}

/// Builder for SubscriberConfig
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    respect_env: Option<bool>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self> {
        let level = level.parse::<tracing::Level>().map_err(|_| {
            TransportError::Configuration(format!(
                "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
            ))
        })?;
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn respect_env(mut self, respect: bool) -> Self {
        self.respect_env = Some(respect);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        let defaults = SubscriberConfig::default();
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(defaults.log_level),
            output_format: self.output_format.unwrap_or(defaults.output_format),
            respect_env: self.respect_env.unwrap_or(defaults.respect_env),
        }
    }
}

/// Install a global `tracing` subscriber.
///
/// An already-installed subscriber is left in place and treated as success.
pub fn init_subscriber(config: SubscriberConfig) -> Result<()> {
    let filter = config.filter();
    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(()),
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(TransportError::Configuration(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}
