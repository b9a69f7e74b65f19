//! Subscriber setup for the crate's `tracing` output
//!
//! Container events are emitted under the [`TARGET`] target; the lines
//! written by [`LogSink::tracing`](crate::LogSink::tracing) for decorated
//! requests go to [`REQUEST_TARGET`].
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON lines, for log aggregation
//! - `logging-pretty` - multi-line colored output, for development
//!
//! Without either subscriber feature [`LoggingBuilder::try_init`] does
//! nothing and the application is expected to install its own subscriber.
//!
//! ```rust,ignore
//! use dispatch_injector::logging;
//!
//! logging::builder()
//!     .requests_only()
//!     .compact()
//!     .init();
//! ```

use tracing::Level;

/// Target of container events.
pub const TARGET: &str = "dispatch_injector";

/// Target of request log lines.
pub const REQUEST_TARGET: &str = "dispatch_injector::requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

/// Which events pass the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogScope {
    /// Everything at or above the level, from any crate.
    #[default]
    All,
    /// Container and request events only.
    Container,
    /// Request log lines only.
    Requests,
}

#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    scope: LogScope,
    with_file: bool,
    with_line_number: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::default(),
            scope: LogScope::default(),
            with_file: false,
            with_line_number: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include per-resolution events.
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Request lines, denials and disposal failures only.
    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    pub fn with_scope(mut self, scope: LogScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn container_only(self) -> Self {
        self.with_scope(LogScope::Container)
    }

    pub fn requests_only(self) -> Self {
        self.with_scope(LogScope::Requests)
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Include source locations.
    pub fn with_source(mut self) -> Self {
        self.with_file = true;
        self.with_line_number = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// `EnvFilter` directives for the configured scope and level.
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        match self.scope {
            LogScope::All => level,
            LogScope::Container => format!("{TARGET}={level}"),
            LogScope::Requests => format!("{REQUEST_TARGET}={level}"),
        }
    }

    /// Install the subscriber globally.
    ///
    /// Fails if a global subscriber is already set. JSON output falls back
    /// to compact lines unless `logging-json` is enabled.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> Result<(), crate::error::BoxError> {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_new(self.directives())?;
        let layer = fmt::layer()
            .with_target(true)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_names(self.with_thread_names);
        let registry = tracing_subscriber::registry().with(filter);

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => registry.with(layer.json()).try_init()?,
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => registry.with(layer.compact()).try_init()?,
            LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
            LogFormat::Compact => registry.with(layer.compact()).try_init()?,
        }
        Ok(())
    }

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> Result<(), crate::error::BoxError> {
        Ok(())
    }

    /// Like [`try_init`](Self::try_init), keeping an already installed
    /// subscriber.
    pub fn init(self) {
        let _ = self.try_init();
    }
}

pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Container and request events at debug level, in the format the enabled
/// features suggest.
pub fn init() {
    let builder = builder().container_only();
    if cfg!(feature = "logging-json") {
        builder.json().init()
    } else {
        builder.pretty().init()
    }
}
