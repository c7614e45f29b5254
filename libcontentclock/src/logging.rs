//! Logging setup for the Content Clock daemon and tests
//!
//! Events go to stderr as plain text, one JSON object per line, or
//! multi-line pretty output. `RUST_LOG` overrides the configured level.
//! Without it, the per-statement logging of `sqlx` and the connection
//! chatter of the HTTP stack are held at `warn`.
//!
//! # Examples
//!
//! ```no_run
//! use libcontentclock::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//!
//! // Or from CONTENTCLOCK_LOG_FORMAT / CONTENTCLOCK_LOG_LEVEL
//! libcontentclock::logging::init_default();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Dependencies whose own events stay at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "hyper_util", "reqwest", "rustls"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Uncolored single-line output, suitable for journald
    Text,
    Json,
    /// Colored multi-line output with source locations
    Pretty,
}

impl LogFormat {
    const NAMES: [(&'static str, LogFormat); 3] = [
        ("text", LogFormat::Text),
        ("json", LogFormat::Json),
        ("pretty", LogFormat::Pretty),
    ];

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
        let wanted = s.trim();
        Self::NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, format)| *format)
            .ok_or_else(|| {
                format!(
                    "unknown log format '{}' (expected text, json or pretty)",
                    s
                )
            })
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default level for Content Clock's own events
    pub level: String,
    /// Raise the default level to `debug`
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Read `CONTENTCLOCK_LOG_FORMAT` and `CONTENTCLOCK_LOG_LEVEL`, defaulting
    /// to text at `info`. An unparseable format falls back to text.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("CONTENTCLOCK_LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("CONTENTCLOCK_LOG_LEVEL")
            .ok()
            .filter(|level| !level.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());

        Self::new(format, level, verbose)
    }

    /// The filter directives used when `RUST_LOG` is unset.
    pub fn directives(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.trim() };
        let mut directives = vec![level.to_string()];
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
        directives.join(",")
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    /// Install the global subscriber.
    ///
    /// Returns `false` when one is already installed, e.g. by an earlier
    /// test in the same process.
    pub fn init(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let result = match self.format {
            LogFormat::Text => builder.with_ansi(false).with_target(false).try_init(),
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
        };

        result.is_ok()
    }
}

/// Initialize logging from the environment at the default verbosity.
pub fn init_default() -> bool {
    LoggingConfig::from_env(false).init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_format_names_are_case_insensitive() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);

        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert!(err.contains("unknown log format 'yaml'"));
    }

    #[test]
    fn test_display_matches_parse() {
        for (name, format) in LogFormat::NAMES {
            assert_eq!(format.to_string(), name);
        }
    }

    #[test]
    fn test_directives_quiet_dependencies() {
        let config = LoggingConfig::new(LogFormat::Text, "info".to_string(), false);
        let directives = config.directives();
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(directives.contains("reqwest=warn"));

        let verbose = LoggingConfig::new(LogFormat::Text, "warn".to_string(), true);
        assert!(verbose.directives().starts_with("debug,"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("CONTENTCLOCK_LOG_FORMAT", "json");
        std::env::set_var("CONTENTCLOCK_LOG_LEVEL", "trace");
        let config = LoggingConfig::from_env(false);
        std::env::set_var("CONTENTCLOCK_LOG_FORMAT", "xml");
        std::env::set_var("CONTENTCLOCK_LOG_LEVEL", " ");
        let fallback = LoggingConfig::from_env(true);
        std::env::remove_var("CONTENTCLOCK_LOG_FORMAT");
        std::env::remove_var("CONTENTCLOCK_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");
        assert_eq!(fallback.format, LogFormat::Text);
        assert_eq!(fallback.level, "info");
        assert!(fallback.verbose);
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        config.init();
        assert!(!config.init());
    }
}
