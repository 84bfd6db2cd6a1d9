//! Process-wide log setup for binaries built on this crate.
//!
//! The library itself only emits `tracing` events. Binaries call
//! [`init_from_env`] once at startup; the subscriber writes to stderr.
//!
//! | variable     | values                                       | default |
//! |--------------|----------------------------------------------|---------|
//! | `LOG_LEVEL`  | `TRACE` `DEBUG` `INFO` `WARN` `ERROR` `FATAL` | `INFO`  |
//! | `LOG_FORMAT` | `json` `text`                                | `json`  |
//! | `LOG_SOURCE` | `true` `false`                               | `true`  |

use std::str::FromStr;

use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::OpsResult;
use crate::error::Error;

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const LOG_SOURCE_ENV: &str = "LOG_SOURCE";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Kept for existing deployments; filters like [`LogLevel::Error`].
    Fatal,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    pub const fn level_filter(self) -> LevelFilter {
        match self {
            Self::Trace => LevelFilter::TRACE,
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error | Self::Fatal => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            _ => Err(value.to_owned()),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "console" => Ok(Self::Text),
            _ => Err(value.to_owned()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub include_source: bool,
    invalid_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            include_source: true,
            invalid_level: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`; unknown values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(LOG_LEVEL_ENV).filter(|raw| !raw.trim().is_empty()) {
            match raw.parse() {
                Ok(level) => config.level = level,
                Err(invalid) => config.invalid_level = Some(invalid),
            }
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV).and_then(|raw| raw.parse().ok()) {
            config.format = format;
        }
        if let Some(raw) = lookup(LOG_SOURCE_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.include_source = true,
                "0" | "false" | "no" => config.include_source = false,
                _ => {}
            }
        }
        config
    }

    /// The unrecognised `LOG_LEVEL` value, if one was ignored.
    pub fn invalid_level(&self) -> Option<&str> {
        self.invalid_level.as_deref()
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.level.level_filter().into())
            .parse_lossy("")
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> OpsResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_writer(std::io::stderr)
        .with_file(config.include_source)
        .with_line_number(config.include_source);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|error| Error::LoggingInit {
        message: error.to_string(),
    })?;

    if let Some(invalid) = config.invalid_level() {
        warn!(
            value = invalid,
            fallback = %config.level,
            "unknown LOG_LEVEL, using default"
        );
    }
    Ok(())
}

pub fn init_from_env() -> OpsResult<()> {
    init(&LoggingConfig::from_env())
}

/// Indented JSON for log output. Never fails; serialization errors are
/// returned as text.
pub fn pretty_json<T>(value: &T) -> String
where
    T: Serialize + ?Sized,
{
    match serde_json::to_string_pretty(value) {
        Ok(text) => text,
        Err(error) => error.to_string(),
    }
}
