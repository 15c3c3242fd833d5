//! Diagnostic snapshots taken on every breach
//!
//! Each configured diagnostic command has its output saved to its own report
//! file. Snapshots are never throttled; a failed capture is logged and the
//! remaining commands still run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::SnapshotCommand;
use crate::runner::CommandRunner;
use crate::throttle::AlertKind;

/// `YYMMDD_HHMMSS.ffffff`, always UTC
const TIMESTAMP_FORMAT: &str = "%y%m%d_%H%M%S%.6f";

/// Report file name: `<kind>_report_[<tool>_]<timestamp>_<pct>.txt`.
///
/// The percentage is truncated toward zero.
pub fn report_file_name(kind: AlertKind, tool: Option<&str>, at: DateTime<Utc>, percent: f64) -> String {
    let tool = tool.map(|tool| format!("{}_", tool)).unwrap_or_default();
    format!(
        "{}_report_{}{}_{}.txt",
        kind.label(),
        tool,
        at.format(TIMESTAMP_FORMAT),
        percent.trunc() as i64
    )
}

/// Files produced by one capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

impl CaptureSummary {
    pub fn attempted(&self) -> usize {
        self.written.len() + self.failed
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCapturer {
    report_dir: PathBuf,
}

impl SnapshotCapturer {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self { report_dir: report_dir.into() }
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn report_path(&self, kind: AlertKind, tool: Option<&str>, at: DateTime<Utc>, percent: f64) -> PathBuf {
        self.report_dir.join(report_file_name(kind, tool, at, percent))
    }

    /// Run every command in `commands` once, all stamped with `at`
    pub async fn capture(
        &self,
        runner: &dyn CommandRunner,
        kind: AlertKind,
        commands: &[SnapshotCommand],
        at: DateTime<Utc>,
        percent: f64,
    ) -> CaptureSummary {
        let mut summary = CaptureSummary::default();

        for snapshot in commands {
            let path = self.report_path(kind, snapshot.tool.as_deref(), at, percent);
            match runner.run_to_file(&snapshot.command, &path).await {
                Ok(()) => {
                    info!(%kind, path = %path.display(), "Saved report");
                    summary.written.push(path);
                }
                Err(err) => {
                    error!(%kind, command = %snapshot.command, path = %path.display(), error = %err, "Could not save report");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
