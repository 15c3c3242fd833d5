//! Error handling for the resmon daemon
//!
//! Every failure the monitoring loop can run into is represented here. None of
//! them are fatal to the loop: callers log and carry on, so these types mostly
//! exist to give log lines a precise shape and to let tests match on causes.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for the daemon
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External command errors
    #[error("Command error: {0}")]
    Runner(#[from] RunnerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic errors
    #[error("{0}")]
    Generic(String),
}

/// Errors raised while running an external command
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("could not execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed reading output of '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("could not write output to {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised while pulling a number out of command output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("'{text}' is not a valid 32-bit integer")]
    InvalidInteger { text: String },

    #[error("no digits found in field")]
    NoDigits,

    #[error("marker '{marker}' not found in first line")]
    MarkerNotFound { marker: String },

    #[error("output has no line after the header")]
    MissingLine,

    #[error("field at offset {offset} runs past the end of a {len}-byte buffer")]
    OutOfBounds { offset: usize, len: usize },

    #[error("block width {width} is narrower than the header")]
    BlockTooNarrow { width: usize },
}

/// Configuration related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Configuration parsing error: {reason}")]
    ParseError { reason: String },

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidValue { field: String, value: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration file permission denied: {path}")]
    PermissionDenied { path: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, MonitorError>;

/// A specialized result type for command execution
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;

/// A specialized result type for text extraction
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// A specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl MonitorError {
    /// Whether the next cycle can be expected to succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        match self {
            MonitorError::Config(_) => false,
            MonitorError::Runner(RunnerError::Output { .. }) => false,
            MonitorError::Io(io_error) => {
                matches!(io_error.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
            }
            _ => true,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            MonitorError::Config(_) => "config",
            MonitorError::Runner(RunnerError::Timeout { .. }) => "timeout",
            MonitorError::Runner(_) => "command",
            MonitorError::Io(_) => "io",
            MonitorError::Generic(_) => "generic",
        }
    }
}

impl RunnerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout { .. })
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::Generic(msg)
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::Generic(msg.to_string())
    }
}
