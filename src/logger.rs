//! Leveled logger handles and the process-wide subscriber.
//!
//! A [`Logger`] carries its own verbosity, so two components can log at
//! different levels through the same `log` facade. The binary installs a
//! `tracing-subscriber` formatter once with [`init_subscriber`]; `log`
//! records reach it through the `tracing-log` bridge.

use std::fmt;
use std::sync::Arc;

use log::{Level, LevelFilter};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Target used by loggers that were not given a name.
pub const DEFAULT_TARGET: &str = "wa_bootstrap";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggerError {
    #[error("log level must not be empty")]
    EmptyLevel,
    #[error("unrecognised log level: '{0}'")]
    InvalidLevel(String),
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Parse a level name. Besides the usual names, `fatal` maps to `error` and
/// `silent` turns logging off.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    let trimmed = level.trim();
    if trimmed.is_empty() {
        return Err(LoggerError::EmptyLevel);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "trace" => Ok(LevelFilter::Trace),
        "debug" => Ok(LevelFilter::Debug),
        "info" => Ok(LevelFilter::Info),
        "warn" => Ok(LevelFilter::Warn),
        "error" | "fatal" => Ok(LevelFilter::Error),
        "silent" | "off" => Ok(LevelFilter::Off),
        _ => Err(LoggerError::InvalidLevel(level.to_string())),
    }
}

/// Install the global formatter.
///
/// `RUST_LOG` takes precedence when it is set and valid; otherwise `level`
/// is used.
pub fn init_subscriber(level: &str) -> Result<(), LoggerError> {
    let fallback = parse_level(level)?.to_string().to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .map_err(|e| LoggerError::InvalidLevel(format!("{level}: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggerError::Install(e.to_string()))
}

/// A named logger with its own level filter.
#[derive(Clone, PartialEq, Eq)]
pub struct Logger {
    level: LevelFilter,
    target: Arc<str>,
}

impl Logger {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            target: Arc::from(DEFAULT_TARGET),
        }
    }

    /// Same logger under a different target.
    pub fn named(mut self, target: &str) -> Self {
        self.target = Arc::from(target);
        self
    }

    /// Derived logger at the same level, targeting `parent::name`.
    pub fn child(&self, name: &str) -> Self {
        Self {
            level: self.level,
            target: Arc::from(format!("{}::{}", self.target, name)),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if self.enabled(level) {
            log::log!(target: &*self.target, level, "{}", args);
        }
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

/// A logger built without options logs at `info`.
impl Default for Logger {
    fn default() -> Self {
        Self::new(LevelFilter::Info)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("target", &&*self.target)
            .finish()
    }
}
