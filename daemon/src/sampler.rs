//! Memory and CPU samplers
//!
//! Each sampler runs one command into the caller's reusable buffer and turns
//! the text into a percentage. Only a timeout is reported as an error; every
//! other failure is logged and degrades the reading as described on each
//! sampler.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CommandsConfig;
use crate::error::RunnerResult;
use crate::extract::{extract_or_zero, FieldExtractor, FixedColumn, HeaderSearch};
use crate::runner::CommandRunner;
use crate::throttle::AlertKind;

/// One reading, consumed by the monitor in the cycle that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub kind: AlertKind,
    pub percent: f64,
}

impl Sample {
    pub fn new(kind: AlertKind, percent: f64) -> Self {
        Self { kind, percent }
    }

    /// False for the 0/0 reading produced when both memory fields are missing
    pub fn is_finite(&self) -> bool {
        self.percent.is_finite()
    }
}

/// Used share of `used + free`, in percent. NaN when both are zero.
pub fn memory_percent(used: i32, free: i32) -> f64 {
    let used = f64::from(used);
    100.0 * used / (used + f64::from(free))
}

/// Run `command` into `buffer`, passing timeouts up and logging anything else.
async fn capture(runner: &dyn CommandRunner, command: &str, buffer: &mut String) -> RunnerResult<()> {
    buffer.clear();
    match runner.run(command, buffer).await {
        Ok(()) => Ok(()),
        Err(err) if err.is_timeout() => Err(err),
        Err(err) => {
            warn!(command, error = %err, "Could not execute sampling command");
            Ok(())
        }
    }
}

/// Reads the used and free blocks of a `free -L` style report.
///
/// A block that cannot be parsed counts as zero, so a report with no numbers
/// at all produces a non-finite percentage.
#[derive(Debug, Clone)]
pub struct MemorySampler {
    command: String,
    used: FixedColumn,
    free: FixedColumn,
}

impl MemorySampler {
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_columns(command, FixedColumn::new(2), FixedColumn::new(3))
    }

    pub fn with_columns(command: impl Into<String>, used: FixedColumn, free: FixedColumn) -> Self {
        Self { command: command.into(), used, free }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn sample(&self, runner: &dyn CommandRunner, buffer: &mut String) -> RunnerResult<Sample> {
        capture(runner, &self.command, buffer).await?;

        let used = extract_or_zero(&self.used, buffer, &self.command);
        let free = extract_or_zero(&self.free, buffer, &self.command);
        let percent = memory_percent(used, free);
        debug!(used, free, percent, "Memory sampled");

        Ok(Sample::new(AlertKind::Memory, percent))
    }
}

/// Reads the idle column of a `sar` style report and returns `100 - idle`.
///
/// When the idle value cannot be read the whole sample is `0`, never `100`.
#[derive(Debug, Clone)]
pub struct CpuSampler {
    command: String,
    idle: HeaderSearch,
}

impl CpuSampler {
    pub fn new(command: impl Into<String>, idle_marker: &str) -> Self {
        Self::with_column(command, HeaderSearch::new(idle_marker))
    }

    pub fn with_column(command: impl Into<String>, idle: HeaderSearch) -> Self {
        Self { command: command.into(), idle }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn sample(&self, runner: &dyn CommandRunner, buffer: &mut String) -> RunnerResult<Sample> {
        capture(runner, &self.command, buffer).await?;

        let percent = match self.idle.extract(buffer) {
            Ok(idle) => f64::from(100 - idle.clamp(0, 100)),
            Err(err) => {
                warn!(
                    source = %self.command,
                    error = %err,
                    output = %buffer,
                    "Failed to parse idle column from command output"
                );
                0.0
            }
        };
        debug!(percent, "CPU sampled");

        Ok(Sample::new(AlertKind::Cpu, percent))
    }
}

/// Build both samplers from the configured commands
pub fn from_config(commands: &CommandsConfig) -> (MemorySampler, CpuSampler) {
    (
        MemorySampler::new(commands.memory.clone()),
        CpuSampler::new(commands.cpu.clone(), &commands.cpu_idle_marker),
    )
}
