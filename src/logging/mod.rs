//! Logging setup on top of `tracing`
//!
//! The crate only emits `tracing` events; installing a subscriber is up to the
//! application. These helpers install a `tracing-subscriber` registry once per
//! process, in human-readable or JSON form.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., "warn,memforge=debug"), wins
//!   over everything else
//! - `MEMFORGE_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `MEMFORGE_LOG_FORMAT`: Output format ("human" or "json")

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{MemError, MemResult};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

const LOG_LEVEL_ENV: &str = "MEMFORGE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "MEMFORGE_LOG_FORMAT";

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable colored output
    #[default]
    Human,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Some(LogFormat::Human),
            "json" | "structured" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include source file and line in every event
    pub with_file_info: bool,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    /// Read `MEMFORGE_LOG_LEVEL` and `MEMFORGE_LOG_FORMAT`; unset ones keep defaults
    pub fn from_env() -> MemResult<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(LOG_LEVEL_ENV) {
            config.level = LogLevel::from_str(&value).ok_or_else(|| {
                MemError::InvalidConfiguration(format!("{}={}", LOG_LEVEL_ENV, value))
            })?;
        }
        if let Ok(value) = std::env::var(LOG_FORMAT_ENV) {
            config.format = LogFormat::from_str(&value).ok_or_else(|| {
                MemError::InvalidConfiguration(format!("{}={}", LOG_FORMAT_ENV, value))
            })?;
        }
        Ok(config)
    }
}

/// Initialize logging from the environment, ignoring invalid values.
///
/// Idempotent.
pub fn init_logging_default() {
    let config = LoggingConfig::from_env().unwrap_or_default();
    init_with_config(&config);
}

/// Initialize logging from the environment.
///
/// Idempotent. Invalid `MEMFORGE_LOG_*` values are reported and nothing is
/// installed.
pub fn init_logging_from_env() -> MemResult<()> {
    let config = LoggingConfig::from_env()?;
    init_with_config(&config);
    Ok(())
}

/// Initialize logging with an explicit configuration.
///
/// Idempotent: only the first call in a process installs a subscriber.
pub fn init_with_config(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = build_env_filter(config.level);
        // Another subscriber may already be installed by the application
        let _ = match config.format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(false)
                        .with_file(config.with_file_info)
                        .with_line_number(config.with_file_info),
                )
                .try_init(),
            LogFormat::Human => tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_file(config.with_file_info)
                        .with_line_number(config.with_file_info),
                )
                .try_init(),
        };
    });
}

/// `RUST_LOG` if set and valid, otherwise `level`
fn build_env_filter(level: LogLevel) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|rust_log| EnvFilter::try_new(rust_log).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_filter_str()))
}

/// Check if a subscriber has been installed through this module
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}
