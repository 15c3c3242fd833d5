//! Monitor loop
//!
//! [`MonitorService`] drives one memory phase and one CPU phase per cycle,
//! then sleeps for the configured interval. Nothing that happens inside a
//! cycle can stop the loop: failures are logged, counted in
//! [`MonitorStats`] and the next cycle acts as the retry.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{MonitorConfig, SnapshotCommand};
use crate::error::{MonitorError, RunnerResult};
use crate::notify::{Notifier, NotifyOutcome};
use crate::runner::{CommandRunner, ShellRunner};
use crate::sampler::{self, CpuSampler, MemorySampler, Sample};
use crate::snapshot::{CaptureSummary, SnapshotCapturer};
use crate::throttle::{AlertKind, AlertState};

/// Initial capacity of the buffer shared by both samplers
const SAMPLE_BUFFER_CAPACITY: usize = 256;

/// What the service is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Starting,
    Sampling(AlertKind),
    Sleeping,
}

/// Outcome of one metric's phase within a cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseReport {
    /// `None` when the sampling command timed out
    pub sample: Option<Sample>,
    pub breached: bool,
    /// Stamp of the breach, shared by its reports and its throttle check
    pub breached_at: Option<DateTime<Utc>>,
    pub snapshots: CaptureSummary,
    /// `None` when no breach happened
    pub notification: Option<NotifyOutcome>,
}

impl PhaseReport {
    fn sampled(sample: Sample) -> Self {
        Self { sample: Some(sample), ..Self::default() }
    }
}

/// Everything one cycle did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub memory: PhaseReport,
    pub cpu: PhaseReport,
}

impl CycleReport {
    pub fn phase(&self, kind: AlertKind) -> &PhaseReport {
        match kind {
            AlertKind::Memory => &self.memory,
            AlertKind::Cpu => &self.cpu,
        }
    }
}

/// Running totals since the service started
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub cycles: u64,
    pub memory_breaches: u64,
    pub cpu_breaches: u64,
    pub snapshots_written: u64,
    pub snapshots_failed: u64,
    pub notifications_sent: u64,
    pub notifications_suppressed: u64,
    pub notifications_failed: u64,
    /// Timed out or non-finite samples
    pub sample_failures: u64,
    pub last_cycle: Option<DateTime<Utc>>,
}

impl MonitorStats {
    pub fn breaches(&self, kind: AlertKind) -> u64 {
        match kind {
            AlertKind::Memory => self.memory_breaches,
            AlertKind::Cpu => self.cpu_breaches,
        }
    }

    fn record_phase(&mut self, kind: AlertKind, report: &PhaseReport) {
        match report.sample {
            Some(sample) if sample.is_finite() => {}
            _ => self.sample_failures += 1,
        }

        if report.breached {
            match kind {
                AlertKind::Memory => self.memory_breaches += 1,
                AlertKind::Cpu => self.cpu_breaches += 1,
            }
        }

        self.snapshots_written += report.snapshots.written.len() as u64;
        self.snapshots_failed += report.snapshots.failed as u64;

        match report.notification {
            Some(NotifyOutcome::Sent { .. }) => self.notifications_sent += 1,
            Some(NotifyOutcome::Suppressed) => self.notifications_suppressed += 1,
            Some(NotifyOutcome::Failed) => self.notifications_failed += 1,
            Some(NotifyOutcome::Disabled) | None => {}
        }
    }
}

/// The resource monitor
pub struct MonitorService {
    config: MonitorConfig,
    runner: Arc<dyn CommandRunner>,
    memory: MemorySampler,
    cpu: CpuSampler,
    capturer: SnapshotCapturer,
    notifier: Notifier,
    alert_state: AlertState,
    buffer: String,
    stats: MonitorStats,
    phase: CyclePhase,
}

impl MonitorService {
    /// Build a service that runs real shell commands
    pub fn from_config(config: MonitorConfig) -> Self {
        let runner = Arc::new(ShellRunner::new(config.command_timeout()));
        Self::new(config, runner)
    }

    pub fn new(config: MonitorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let (memory, cpu) = sampler::from_config(&config.commands);
        let capturer = SnapshotCapturer::new(config.report_dir.clone());
        let notifier = Notifier::from_config(&config);

        Self {
            config,
            runner,
            memory,
            cpu,
            capturer,
            notifier,
            alert_state: AlertState::new(),
            buffer: String::with_capacity(SAMPLE_BUFFER_CAPACITY),
            stats: MonitorStats::default(),
            phase: CyclePhase::Starting,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn alert_state(&self) -> &AlertState {
        &self.alert_state
    }

    /// Sample, capture and notify forever, sleeping `interval` between cycles
    pub async fn run(&mut self) {
        info!(
            interval_secs = self.config.interval_secs,
            memory_threshold = self.config.memory_threshold_pct,
            cpu_threshold = self.config.cpu_threshold_pct,
            notifications = self.notifier.is_enabled(),
            "Starting resource monitor"
        );

        let interval = self.config.interval();
        loop {
            self.run_cycle(Utc::now()).await;
            self.phase = CyclePhase::Sleeping;
            tokio::time::sleep(interval).await;
        }
    }

    /// One cycle: the memory phase, then the CPU phase.
    ///
    /// `now` is the start of the cycle. A breach is stamped with `now` plus the
    /// time spent in the cycle before it was evaluated.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let memory = self.run_phase(AlertKind::Memory, now, started).await;
        let cpu = self.run_phase(AlertKind::Cpu, now, started).await;

        self.stats.cycles += 1;
        self.stats.last_cycle = Some(now);
        debug!(stats = ?self.stats, "Cycle complete");

        CycleReport { at: now, memory, cpu }
    }

    fn threshold(&self, kind: AlertKind) -> f64 {
        match kind {
            AlertKind::Memory => self.config.memory_threshold_pct,
            AlertKind::Cpu => self.config.cpu_threshold_pct,
        }
    }

    fn snapshot_commands(&self, kind: AlertKind) -> &[SnapshotCommand] {
        match kind {
            AlertKind::Memory => &self.config.commands.memory_snapshots,
            AlertKind::Cpu => &self.config.commands.cpu_snapshots,
        }
    }

    async fn sample(&mut self, kind: AlertKind) -> RunnerResult<Sample> {
        let runner = self.runner.as_ref();
        match kind {
            AlertKind::Memory => self.memory.sample(runner, &mut self.buffer).await,
            AlertKind::Cpu => self.cpu.sample(runner, &mut self.buffer).await,
        }
    }

    async fn run_phase(&mut self, kind: AlertKind, cycle_start: DateTime<Utc>, started: Instant) -> PhaseReport {
        self.phase = CyclePhase::Sampling(kind);

        let report = match self.sample(kind).await {
            Ok(sample) => {
                let elapsed = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
                self.evaluate(sample, cycle_start + elapsed).await
            }
            Err(err) => {
                let err = MonitorError::from(err);
                error!(
                    %kind,
                    category = err.category(),
                    recoverable = err.is_recoverable(),
                    error = %err,
                    "Sampling failed, skipping this cycle"
                );
                PhaseReport::default()
            }
        };

        self.stats.record_phase(kind, &report);
        report
    }

    async fn evaluate(&mut self, sample: Sample, now: DateTime<Utc>) -> PhaseReport {
        let kind = sample.kind;
        let percent = sample.percent;
        let mut report = PhaseReport::sampled(sample);

        if !sample.is_finite() {
            warn!(%kind, percent, "Ignoring non-finite sample");
            return report;
        }

        let threshold = self.threshold(kind);
        if percent < threshold {
            debug!(%kind, percent, threshold, "Below threshold");
            return report;
        }

        warn!(%kind, percent, threshold, "Threshold exceeded");
        report.breached = true;
        report.breached_at = Some(now);

        let runner = self.runner.as_ref();
        report.snapshots = self
            .capturer
            .capture(runner, kind, self.snapshot_commands(kind), now, percent)
            .await;
        report.notification = Some(
            self.notifier
                .notify(runner, &mut self.alert_state, kind, percent, now)
                .await,
        );

        report
    }
}
