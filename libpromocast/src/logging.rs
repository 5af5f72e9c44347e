//! Shared logging setup for the Promocast daemon and CLI
//!
//! Text output is meant for terminals and pipes, JSON for log shippers
//! watching the dispatch daemon, pretty for local development. Everything goes
//! to stderr so stdout stays free for command output.
//!
//! ```no_run
//! use libpromocast::logging::{LoggingConfig, LogFormat};
//!
//! LoggingConfig::new(LogFormat::Json, "info", false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

const FORMAT_VAR: &str = "PROMOCAST_LOG_FORMAT";
const LEVEL_VAR: &str = "PROMOCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain lines without colors
    #[default]
    Text,
    /// One JSON object per line, fields flattened
    Json,
    /// Multi-line and colored
    Pretty,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [LogFormat::Text, LogFormat::Json, LogFormat::Pretty]
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid log format: '{}'. Valid options: text, json, pretty", s))
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset, e.g. "info" or "libpromocast=debug"
    pub level: String,
    /// Forces "debug" in place of `level`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>, verbose: bool) -> Self {
        Self {
            format,
            level: level.into(),
            verbose,
        }
    }

    /// Read `PROMOCAST_LOG_FORMAT` and `PROMOCAST_LOG_LEVEL`, defaulting to text at `info`
    pub fn from_env(verbose: bool) -> Self {
        Self::from_env_or(verbose, "info")
    }

    /// Like [`LoggingConfig::from_env`] with a different fallback level
    ///
    /// The CLI falls back to "warn" so that scripted use only sees command output.
    pub fn from_env_or(verbose: bool, default_level: &str) -> Self {
        let format = std::env::var(FORMAT_VAR)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let level = std::env::var(LEVEL_VAR).unwrap_or_else(|_| default_level.to_string());

        Self::new(format, level, verbose)
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }

    /// Install the global subscriber; later calls are ignored
    pub fn init(&self) {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let _ = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => builder.with_target(false).with_ansi(false).try_init(),
        };
    }
}

/// Initialize logging from the environment
///
/// ```bash
/// export PROMOCAST_LOG_FORMAT=json
/// export PROMOCAST_LOG_LEVEL=debug
/// promo-send --once
/// ```
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(" Json ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("'xml'"));

        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_reads_promocast_vars() {
        std::env::set_var(FORMAT_VAR, "json");
        std::env::set_var(LEVEL_VAR, "libpromocast=trace");
        let config = LoggingConfig::from_env_or(false, "warn");
        std::env::remove_var(FORMAT_VAR);
        std::env::remove_var(LEVEL_VAR);

        assert_eq!(config, LoggingConfig::new(LogFormat::Json, "libpromocast=trace", false));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var(LEVEL_VAR);
        std::env::set_var(FORMAT_VAR, "xml");
        let daemon = LoggingConfig::from_env(true);
        let cli = LoggingConfig::from_env_or(false, "warn");
        std::env::remove_var(FORMAT_VAR);

        assert_eq!(daemon.format, LogFormat::Text);
        assert_eq!(daemon.level, "info");
        assert!(daemon.verbose);
        assert_eq!(cli.level, "warn");
    }
}
