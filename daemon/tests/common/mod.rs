//! Shared helpers for the integration tests
//!
//! The stand-in tools print canned reports with `printf`, so the real shell
//! runner can be exercised without `free` or `sar` being installed.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use resmon::config::{MonitorConfig, SnapshotCommand};
use tempfile::TempDir;

/// A `free -L` line with the given used and free blocks
pub fn free_report(used: &str, free: &str) -> String {
    format!(
        "{:<8} {:>10} {:<8} {:>10} {:<8} {:>10} {:<8} {:>10} \n",
        "SwapUse", "0", "CachUse", "1024", "MemUse", used, "MemFree", free
    )
}

/// A `sar` tail whose idle column reads `idle`
pub fn sar_report(idle: &str) -> String {
    format!(
        "12:00:01 AM     CPU     %user     %nice   %system   %iowait    %steal     %idle\n\
         12:00:02 AM     all        60         0         5         0         0       {:>3}\n",
        idle
    )
}

/// Shell command printing `text` verbatim
pub fn printf_command(text: &str) -> String {
    format!("printf '%s' '{}'", text)
}

/// Test environment rooted in a temporary directory
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self { dir: TempDir::new().unwrap() }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.dir.path().join("reports")
    }

    pub fn alerts_log(&self) -> PathBuf {
        self.dir.path().join("alerts.log")
    }

    /// Configuration whose tools report the given memory blocks and CPU idle value
    pub fn config(&self, used: &str, free: &str, idle: &str) -> MonitorConfig {
        fs::create_dir_all(self.reports_dir()).unwrap();

        let mut config = MonitorConfig::default();
        config.interval_secs = 1;
        config.command_timeout_secs = 5;
        config.report_dir = self.reports_dir();
        config.notify_command = Some(format!("printf '%s\\n' >> {}", self.alerts_log().display()));
        config.commands.memory = printf_command(&free_report(used, free));
        config.commands.cpu = printf_command(&sar_report(idle));
        config.commands.memory_snapshots = vec![
            SnapshotCommand::new(Some("ps"), "echo memory by process"),
            SnapshotCommand::new(Some("top"), "echo top memory"),
        ];
        config.commands.cpu_snapshots = vec![SnapshotCommand::new(None, "echo cpu by process")];
        config
    }

    /// Save `config` into the environment and return its path
    pub fn write_config(&self, config: &MonitorConfig) -> PathBuf {
        let path = self.dir.path().join("resmon.toml");
        config.save_to_file(&path).unwrap();
        path
    }

    pub fn alerts(&self) -> Vec<String> {
        match fs::read_to_string(self.alerts_log()) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Report file names starting with `prefix`, sorted
    pub fn reports(&self, prefix: &str) -> Vec<String> {
        report_names(&self.reports_dir(), prefix)
    }
}

fn report_names(dir: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();
    names
}
