//! Per-kind notification throttling
//!
//! At most one notification per alert kind is let through per cooldown window.
//! Breaches inside the window are dropped from the notification channel; their
//! snapshots are still captured by the monitor.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The dimension along which thresholds and throttling are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Memory,
    Cpu,
}

impl AlertKind {
    pub const ALL: [AlertKind; 2] = [AlertKind::Memory, AlertKind::Cpu];

    /// Prefix used in report file names
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::Memory => "mem",
            AlertKind::Cpu => "cpu",
        }
    }

    /// Headline of the notification message
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::Memory => "Memory consumption is high",
            AlertKind::Cpu => "CPU consumption is high",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Memory => write!(f, "memory"),
            AlertKind::Cpu => write!(f, "cpu"),
        }
    }
}

/// When each kind of notification was last dispatched.
///
/// Starts empty, so the first breach of each kind always notifies. Lives for
/// the process lifetime and is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertState {
    memory: Option<DateTime<Utc>>,
    cpu: Option<DateTime<Utc>>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self, kind: AlertKind) -> Option<DateTime<Utc>> {
        match kind {
            AlertKind::Memory => self.memory,
            AlertKind::Cpu => self.cpu,
        }
    }

    fn slot_mut(&mut self, kind: AlertKind) -> &mut Option<DateTime<Utc>> {
        match kind {
            AlertKind::Memory => &mut self.memory,
            AlertKind::Cpu => &mut self.cpu,
        }
    }
}

/// Leaky bucket of one: a notification is allowed only once the cooldown has
/// fully elapsed since the previous one of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertThrottle {
    cooldown: Duration,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True when `now` is strictly later than the last dispatch plus the cooldown
    pub fn should_notify(&self, state: &AlertState, kind: AlertKind, now: DateTime<Utc>) -> bool {
        match state.last_sent(kind) {
            None => true,
            // A clock that went backwards yields an error here and keeps the gate shut
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(elapsed) => elapsed > self.cooldown,
                Err(_) => false,
            },
        }
    }

    pub fn mark_notified(&self, state: &mut AlertState, kind: AlertKind, now: DateTime<Utc>) {
        *state.slot_mut(kind) = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_cooldown_window() {
        let throttle = AlertThrottle::new(Duration::from_secs(1200));
        let mut state = AlertState::new();

        assert!(throttle.should_notify(&state, AlertKind::Memory, at(0)));
        throttle.mark_notified(&mut state, AlertKind::Memory, at(0));

        assert!(!throttle.should_notify(&state, AlertKind::Memory, at(600)));
        assert!(!throttle.should_notify(&state, AlertKind::Memory, at(1200)));
        assert!(throttle.should_notify(&state, AlertKind::Memory, at(1201)));
    }

    #[test]
    fn test_kinds_are_tracked_independently() {
        let throttle = AlertThrottle::new(Duration::from_secs(1200));
        let mut state = AlertState::new();

        throttle.mark_notified(&mut state, AlertKind::Memory, at(0));

        assert!(throttle.should_notify(&state, AlertKind::Cpu, at(1)));
        assert_eq!(state.last_sent(AlertKind::Memory), Some(at(0)));
        assert_eq!(state.last_sent(AlertKind::Cpu), None);
    }

    #[test]
    fn test_suppressed_breaches_do_not_extend_window() {
        let throttle = AlertThrottle::new(Duration::from_secs(60));
        let mut state = AlertState::new();
        throttle.mark_notified(&mut state, AlertKind::Cpu, at(0));

        for secs in [10, 20, 59, 60] {
            assert!(!throttle.should_notify(&state, AlertKind::Cpu, at(secs)));
        }
        assert!(throttle.should_notify(&state, AlertKind::Cpu, at(61)));
    }

    #[test]
    fn test_zero_cooldown_still_needs_time_to_pass() {
        let throttle = AlertThrottle::new(Duration::ZERO);
        let mut state = AlertState::new();
        throttle.mark_notified(&mut state, AlertKind::Memory, at(5));

        assert!(!throttle.should_notify(&state, AlertKind::Memory, at(5)));
        assert!(throttle.should_notify(&state, AlertKind::Memory, at(6)));
    }

    #[test]
    fn test_clock_going_backwards_suppresses() {
        let throttle = AlertThrottle::new(Duration::from_secs(60));
        let mut state = AlertState::new();
        throttle.mark_notified(&mut state, AlertKind::Memory, at(1000));

        assert!(!throttle.should_notify(&state, AlertKind::Memory, at(0)));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AlertKind::Memory.label(), "mem");
        assert_eq!(AlertKind::Cpu.label(), "cpu");
        assert_eq!(AlertKind::Cpu.to_string(), "cpu");
        assert_eq!(AlertKind::Memory.title(), "Memory consumption is high");
    }
}
