//! Log level configuration and subscriber setup
//!
//! Logs are structured JSON lines written to stderr. The threshold comes
//! from [`crate::config::AppConfig::log_level`].

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Log levels in order of severity (lowest to highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = InvalidLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "err" => Ok(LogLevel::Error),
            _ => Err(InvalidLogLevel(s.to_string())),
        }
    }
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Accepted spellings, for help and error text
    pub fn valid_values() -> &'static [&'static str] {
        &["trace", "debug", "info", "warn", "error"]
    }

    /// Filter directives for this threshold. HTTP and SQLite internals stay
    /// at `warn` unless tracing is requested.
    fn filter_directives(self) -> String {
        if self == LogLevel::Trace {
            "trace".to_string()
        } else {
            format!("{self},hyper=warn,hyper_util=warn,rusqlite=warn")
        }
    }
}

/// Error type for invalid log level strings
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid log level '{0}'. Valid levels are: {valid}", valid = LogLevel::valid_values().join(", "))]
pub struct InvalidLogLevel(pub String);

/// Install the global JSON subscriber.
///
/// Returns `false` when a subscriber was already installed (tests install
/// their own or none at all).
pub fn init(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(level.filter_directives()))
        .with_target(true)
        .try_init()
        .is_ok()
}
