//! Logging setup on `tracing-subscriber`.
//!
//! The runtime installs a global subscriber from [`LoggingConfig`] when it
//! is built from configuration. Applications that want their own setup can
//! install one first; the runtime then leaves it alone.
//!
//! ```rust,ignore
//! use slackhive_runtime::config::{LogLevel, SpanEventConfig};
//! use slackhive_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .level(LogLevel::Debug)
//!     .filter("slackhive_transport", LogLevel::Trace)
//!     .span_events(SpanEventConfig::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the base level; per-module filters are
//! still added on top.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig};

/// File name used when `file_path` names only a directory.
const DEFAULT_LOG_FILE: &str = "slackhive.log";

/// Installs the global subscriber described by `config`. Does nothing if
/// one is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config.clone()).try_init();
}

/// Builds the global subscriber, starting from a [`LoggingConfig`].
#[derive(Debug)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    directives: Vec<String>,
    with_target: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::from_config(LoggingConfig::default())
    }

    pub fn from_config(config: LoggingConfig) -> Self {
        Self {
            config,
            directives: Vec::new(),
            with_target: true,
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Sets the level for one module path, e.g. `slackhive_framework`.
    pub fn filter(mut self, module: impl Into<String>, level: LogLevel) -> Self {
        self.config.filters.insert(module.into(), level);
        self
    }

    /// Adds a raw `EnvFilter` directive such as `hyper=warn`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    /// Logs to `path`, rotated per [`rotation`](Self::rotation).
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = LogOutput::File;
        self.config.file_path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: LogRotation) -> Self {
        self.config.rotation = rotation;
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.config.thread_ids = enabled;
        self
    }

    /// Include file names and line numbers.
    pub fn file_location(mut self, enabled: bool) -> Self {
        self.config.file_location = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the global subscriber, failing if one is already set.
    pub fn try_init(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.layer::<tracing_subscriber::Registry>())
            .with(self.env_filter())
            .try_init()
    }

    /// Module filters in a stable order, then raw directives.
    fn all_directives(&self) -> Vec<String> {
        let mut modules: Vec<_> = self.config.filters.iter().collect();
        modules.sort_by(|a, b| a.0.cmp(b.0));
        modules
            .into_iter()
            .map(|(module, level)| format!("{module}={level}"))
            .chain(self.directives.iter().cloned())
            .collect()
    }

    fn env_filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));

        self.all_directives()
            .into_iter()
            .fold(base, |filter, directive| match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(e) => {
                    eprintln!("Ignoring invalid log directive {directive:?}: {e}");
                    filter
                }
            })
    }

    fn writer(&self) -> BoxMakeWriter {
        match (self.config.output, &self.config.file_path) {
            (LogOutput::Stdout, _) => BoxMakeWriter::new(std::io::stdout),
            (LogOutput::Stderr, _) => BoxMakeWriter::new(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                BoxMakeWriter::new(file_appender(path, self.config.rotation))
            }
            (LogOutput::File, None) => {
                eprintln!("File logging requested without a file path, using stdout");
                BoxMakeWriter::new(std::io::stdout)
            }
        }
    }

    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let layer = fmt::layer()
            .with_writer(self.writer())
            .with_span_events(span_mask(&self.config.span_events))
            .with_target(self.with_target)
            .with_thread_ids(self.config.thread_ids)
            .with_file(self.config.file_location)
            .with_line_number(self.config.file_location);

        match self.config.format {
            LogFormat::Full => layer.boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => {
                eprintln!("JSON logging requires the json-log feature, using compact");
                layer.compact().boxed()
            }
        }
    }
}

fn file_appender(path: &Path, rotation: LogRotation) -> RollingFileAppender {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .unwrap_or_else(|| OsStr::new(DEFAULT_LOG_FILE));
    match rotation {
        LogRotation::Never => tracing_appender::rolling::never(dir, file),
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, file),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, file),
    }
}

fn span_mask(events: &SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .fold(FmtSpan::NONE, |mask, (_, span)| mask | span)
}
