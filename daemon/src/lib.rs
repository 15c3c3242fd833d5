//! resmon resource monitor library
//!
//! Periodically samples memory and CPU usage by running external diagnostic
//! tools, reads the percentages out of their text reports and, whenever a
//! threshold is met, saves diagnostic snapshots and sends a throttled alert.

pub mod config;
pub mod error;
pub mod extract;
pub mod monitor;
pub mod notify;
pub mod runner;
pub mod sampler;
pub mod snapshot;
pub mod throttle;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use monitor::{CycleReport, MonitorService, MonitorStats};
pub use runner::{CommandRunner, ShellRunner};
pub use sampler::{CpuSampler, MemorySampler, Sample};
pub use throttle::{AlertKind, AlertState, AlertThrottle};
