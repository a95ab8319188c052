//! Structured logging setup for programs embedding the engine.
//!
//! The engine itself only emits `tracing` events and spans: one
//! `analysis_pass` span per run and a `rule` span per evaluated rule. This
//! module installs a `tracing-subscriber` to print them and is only available
//! with the `structured-logging` feature:
//!
//! ```toml
//! [dependencies]
//! kerneldiag = { version = "0.1", features = ["structured-logging"] }
//! ```
//!
//! ```no_run
//! use kerneldiag::logging::TracingLogger;
//! use kerneldiag::{LogFormat, LogLevel};
//!
//! let _logger = TracingLogger::builder()
//!     .with_format(LogFormat::Json)
//!     .with_level(LogLevel::Debug)
//!     .build()
//!     .expect("Failed to initialize logger");
//! ```

use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, LogLevel, LoggingConfig};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid env filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

#[derive(Debug, Clone)]
pub struct TracingLoggerBuilder {
    format: LogFormat,
    level: LogLevel,
    env_filter: Option<String>,
    with_targets: bool,
    with_thread_ids: bool,
    with_span_events: bool,
}

impl Default for TracingLoggerBuilder {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: LogLevel::Info,
            env_filter: None,
            with_targets: true,
            with_thread_ids: false,
            with_span_events: false,
        }
    }
}

impl TracingLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the `[logging]` table of an engine configuration.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new()
            .with_format(config.format)
            .with_level(config.level)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Custom filter directives, e.g. `kerneldiag=debug`. Overrides the level.
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub fn with_targets(mut self, enabled: bool) -> Self {
        self.with_targets = enabled;
        self
    }

    /// Useful with parallel execution, where rules of one level run on
    /// worker threads.
    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    /// Log when pass and rule spans open and close.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn build(self) -> Result<TracingLogger, LoggingError> {
        let env_filter = match &self.env_filter {
            Some(directives) => EnvFilter::try_new(directives)
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
        };

        let span_events = if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let base = fmt::layer()
            .with_target(self.with_targets)
            .with_thread_ids(self.with_thread_ids)
            .with_span_events(span_events);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.with_ansi(false).compact().boxed(),
            LogFormat::Json => base.json().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(env_filter)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;

        Ok(TracingLogger {
            format: self.format,
        })
    }
}

/// Handle to the installed subscriber.
#[derive(Debug)]
pub struct TracingLogger {
    format: LogFormat,
}

impl TracingLogger {
    pub fn builder() -> TracingLoggerBuilder {
        TracingLoggerBuilder::new()
    }

    /// Pretty output at info level.
    pub fn init() -> Result<Self, LoggingError> {
        Self::builder().build()
    }

    pub fn init_from_config(config: &LoggingConfig) -> Result<Self, LoggingError> {
        TracingLoggerBuilder::from_config(config).build()
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }
}
