//! Structured logging configuration
//!
//! tracing-based logging with component-level filtering and a choice of
//! output formats. Development runs get colored pretty output; runs that
//! feed a log aggregator switch to compact output without ANSI.

use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty-printed logs for development
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    /// Parse from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .to_lowercase()
            .as_str()
        {
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Log level and formatting configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,

    /// Default log level directive.
    pub default_level: String,

    /// Component-specific log levels.
    pub component_levels: Vec<(String, String)>,

    /// Enable span events (enter/exit/close).
    pub span_events: bool,

    /// Enable ANSI colors.
    pub ansi: bool,

    /// Include thread names (workers carry their uid in the name).
    pub thread_names: bool,

    /// Include target (module path).
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::from_env(),
            default_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            component_levels: vec![],
            span_events: false,
            ansi: true,
            thread_names: true,
            target: true,
        }
    }
}

impl LogConfig {
    /// Verbose configuration for watching a run live.
    pub fn verbose() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_level: "debug".to_string(),
            component_levels: vec![("pbt".to_string(), "debug".to_string())],
            span_events: true,
            ansi: true,
            thread_names: true,
            target: true,
        }
    }

    /// Quiet configuration: warnings and errors only.
    pub fn quiet() -> Self {
        Self {
            format: LogFormat::Compact,
            default_level: "warn".to_string(),
            component_levels: vec![],
            span_events: false,
            ansi: false,
            thread_names: false,
            target: false,
        }
    }

    fn build_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::new(&self.default_level);
        for (component, level) in &self.component_levels {
            filter = filter.add_directive(
                format!("{component}={level}")
                    .parse()
                    .expect("invalid filter directive"),
            );
        }
        filter
    }
}

/// Initialize the logging system. Errors when a subscriber is already
/// installed (tests install their own).
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = config.build_filter();

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_ansi(config.ansi)
                .with_thread_names(config.thread_names)
                .with_target(config.target)
                .with_span_events(span_events),
        )
        .try_init()?;

    Ok(())
}

/// Initialize with the default (environment-driven) configuration.
pub fn init_default() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LogConfig::default())
}
