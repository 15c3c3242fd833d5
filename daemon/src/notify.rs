//! Throttled alert notifications

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::runner::CommandRunner;
use crate::throttle::{AlertKind, AlertState, AlertThrottle};

/// What happened to one notification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum NotifyOutcome {
    /// No notification command is configured
    Disabled,
    /// Inside the cooldown window of the previous notification
    Suppressed,
    /// The command ran to completion with this exit code
    Sent { exit_code: i32 },
    /// The command could not be started or timed out
    Failed,
}

/// Human readable alert text, e.g. `Memory consumption is high. Consumption is 85.00%`
pub fn message(kind: AlertKind, percent: f64) -> String {
    format!("{}. Consumption is {:.2}%", kind.title(), percent)
}

/// Dispatches alert messages through an external command, at most once per
/// cooldown window for each alert kind.
#[derive(Debug, Clone)]
pub struct Notifier {
    command: Option<String>,
    throttle: AlertThrottle,
}

impl Notifier {
    pub fn new(command: Option<String>, throttle: AlertThrottle) -> Self {
        Self { command, throttle }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.notify_command().map(str::to_string),
            AlertThrottle::new(config.throttle()),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.command.is_some()
    }

    pub fn throttle(&self) -> &AlertThrottle {
        &self.throttle
    }

    /// Full shell line: the configured command followed by the single-quoted message
    pub fn command_line(&self, kind: AlertKind, percent: f64) -> Option<String> {
        self.command
            .as_deref()
            .map(|command| format!("{} '{}'", command, message(kind, percent)))
    }

    /// Notify about a breach unless throttled.
    ///
    /// The throttle window restarts whenever the command actually ran, whatever
    /// its exit code. A command that could not be spawned or timed out leaves
    /// the window untouched so the next breach retries.
    pub async fn notify(
        &self,
        runner: &dyn CommandRunner,
        state: &mut AlertState,
        kind: AlertKind,
        percent: f64,
        now: DateTime<Utc>,
    ) -> NotifyOutcome {
        let Some(command_line) = self.command_line(kind, percent) else {
            return NotifyOutcome::Disabled;
        };

        if !self.throttle.should_notify(state, kind, now) {
            info!(%kind, percent, "Notification throttled");
            return NotifyOutcome::Suppressed;
        }

        match runner.execute(&command_line).await {
            Ok(exit_code) => {
                if exit_code == 0 {
                    info!(%kind, percent, "Notification sent");
                } else {
                    warn!(%kind, exit_code, command = %command_line, "Notification command exited with an error");
                }
                self.throttle.mark_notified(state, kind, now);
                NotifyOutcome::Sent { exit_code }
            }
            Err(err) => {
                warn!(%kind, error = %err, "Could not run notification command");
                NotifyOutcome::Failed
            }
        }
    }
}
