//! Configuration management for the resmon daemon
//!
//! Configuration is resolved once at startup, in this order: built-in
//! defaults, a TOML file, `RESMON_*` environment variables and finally
//! command line flags. The result is immutable for the life of the process.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::extract::parse_int;

/// Main configuration structure for the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Memory usage percentage that counts as a breach, in [0, 100)
    pub memory_threshold_pct: f64,

    /// CPU usage percentage that counts as a breach, in [0, 100)
    pub cpu_threshold_pct: f64,

    /// Seconds to sleep between two cycles
    pub interval_secs: u64,

    /// Shell command invoked with the alert message as its only argument
    pub notify_command: Option<String>,

    /// Minimum seconds between two notifications of the same kind
    pub throttle_secs: u64,

    /// Upper bound on the runtime of any external command
    pub command_timeout_secs: u64,

    /// Directory receiving snapshot reports
    pub report_dir: PathBuf,

    /// External tools used for sampling and snapshots
    pub commands: CommandsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// External commands and the layout hints needed to read their output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prints one line of four equally wide blocks: swap, cache, used, free
    pub memory: String,

    /// Prints a header line containing `cpu_idle_marker` and a data line below it
    pub cpu: String,

    /// Header token of the idle column in the CPU report
    pub cpu_idle_marker: String,

    /// Diagnostics captured on a memory breach
    pub memory_snapshots: Vec<SnapshotCommand>,

    /// Diagnostics captured on a CPU breach
    pub cpu_snapshots: Vec<SnapshotCommand>,
}

/// A diagnostic command whose output is saved to a report file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCommand {
    /// Optional tool label embedded in the report file name
    #[serde(default)]
    pub tool: Option<String>,

    /// Shell command to run
    pub command: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Emit JSON log lines
    pub json: bool,

    /// Also write logs to a daily rotated file at this path
    pub file_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_threshold_pct: 70.0,
            cpu_threshold_pct: 70.0,
            interval_secs: 60,
            notify_command: None,
            throttle_secs: 20 * 60,
            command_timeout_secs: 30,
            report_dir: PathBuf::from("."),
            commands: CommandsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            memory: "free -L".to_string(),
            cpu: "sar --dec=0 1 1 | tail -n 3".to_string(),
            cpu_idle_marker: "%idle".to_string(),
            memory_snapshots: vec![
                SnapshotCommand::new(Some("ps"), "ps aux --sort=-%mem"),
                SnapshotCommand::new(Some("top"), "top -b -n 1 -o =%MEM"),
            ],
            cpu_snapshots: vec![SnapshotCommand::new(None, "ps aux --sort=-%cpu")],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_path: None,
        }
    }
}

impl SnapshotCommand {
    pub fn new(tool: Option<&str>, command: impl Into<String>) -> Self {
        Self {
            tool: tool.map(str::to_string),
            command: command.into(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.to_string_lossy().to_string() })?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults and environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = MonitorConfig::default().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any `RESMON_*` environment variables that are set
    pub fn apply_env(self) -> ConfigResult<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from a variable lookup, leaving unset ones untouched
    pub fn apply_vars<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RESMON_MEMORY_THRESHOLD") {
            self.memory_threshold_pct = parse_env_pct("RESMON_MEMORY_THRESHOLD", &value)?;
        }

        if let Some(value) = lookup("RESMON_CPU_THRESHOLD") {
            self.cpu_threshold_pct = parse_env_pct("RESMON_CPU_THRESHOLD", &value)?;
        }

        if let Some(value) = lookup("RESMON_INTERVAL") {
            self.interval_secs = parse_env_secs("RESMON_INTERVAL", &value)?;
        }

        if let Some(value) = lookup("RESMON_THROTTLE") {
            self.throttle_secs = parse_env_secs("RESMON_THROTTLE", &value)?;
        }

        if let Some(value) = lookup("RESMON_TIMEOUT") {
            self.command_timeout_secs = parse_env_secs("RESMON_TIMEOUT", &value)?;
        }

        if let Some(value) = lookup("RESMON_NOTIFY_COMMAND") {
            self.notify_command = Some(value);
        }

        if let Some(value) = lookup("RESMON_REPORT_DIR") {
            self.report_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup("RESMON_LOG_LEVEL") {
            self.logging.level = value;
        }

        Ok(self)
    }

    /// Load configuration with fallback order: defaults -> file -> env
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = MonitorConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = MonitorConfig::from_file(path)?;
            }
        }

        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        check_pct("memory_threshold_pct", self.memory_threshold_pct)?;
        check_pct("cpu_threshold_pct", self.cpu_threshold_pct)?;

        if self.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "command_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        if self.report_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "report_dir".to_string(),
                value: String::new(),
            });
        }

        check_command("commands.memory", &self.commands.memory)?;
        check_command("commands.cpu", &self.commands.cpu)?;
        check_command("commands.cpu_idle_marker", &self.commands.cpu_idle_marker)?;
        for snapshot in &self.commands.memory_snapshots {
            check_command("commands.memory_snapshots", &snapshot.command)?;
        }
        for snapshot in &self.commands.cpu_snapshots {
            check_command("commands.cpu_snapshots", &snapshot.command)?;
        }

        Ok(())
    }

    /// Notification command, if one is configured
    pub fn notify_command(&self) -> Option<&str> {
        self.notify_command.as_deref().filter(|cmd| !cmd.trim().is_empty())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("resmon").join("resmon.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content)
            .map_err(|_| ConfigError::PermissionDenied { path: path.to_string_lossy().to_string() })?;

        Ok(())
    }
}

fn check_pct(field: &str, value: f64) -> ConfigResult<()> {
    if !value.is_finite() || !(0.0..100.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_command(field: &str, command: &str) -> ConfigResult<()> {
    if command.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: command.to_string(),
        });
    }
    Ok(())
}

fn parse_env_pct(field: &str, value: &str) -> ConfigResult<f64> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_env_secs(field: &str, value: &str) -> ConfigResult<u64> {
    parse_int(value)
        .ok()
        .and_then(|secs| u64::try_from(secs).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
}
