//! Scripted command runner for unit tests

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RunnerError, RunnerResult};
use crate::runner::CommandRunner;

/// What a scripted command does when invoked
#[derive(Debug, Clone)]
pub enum Reply {
    Output(String),
    Timeout,
    SpawnFailure,
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Run(String),
    RunToFile(String, PathBuf),
    Execute(String),
}

/// Replies to commands from a fixed script and records every call.
///
/// Unknown commands produce empty output. `execute` matches on command prefix
/// so a notification template can be scripted without knowing the message.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: HashMap<String, Reply>,
    exit_codes: Vec<(String, Reply, i32)>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, command: &str, output: &str) -> Self {
        self.replies.insert(command.to_string(), Reply::Output(output.to_string()));
        self
    }

    pub fn with_reply(mut self, command: &str, reply: Reply) -> Self {
        self.replies.insert(command.to_string(), reply);
        self
    }

    /// Make `run` of `command` take `delay` before replying
    pub fn with_delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    pub fn with_exit_code(mut self, prefix: &str, code: i32) -> Self {
        self.exit_codes.push((prefix.to_string(), Reply::Output(String::new()), code));
        self
    }

    pub fn with_execute_reply(mut self, prefix: &str, reply: Reply) -> Self {
        self.exit_codes.push((prefix.to_string(), reply, 0));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn files(&self) -> Vec<(String, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RunToFile(command, path) => Some((command, path)),
                _ => None,
            })
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn reply(&self, command: &str) -> Reply {
        self.replies
            .get(command)
            .cloned()
            .unwrap_or_else(|| Reply::Output(String::new()))
    }
}

fn failure(command: &str, reply: &Reply) -> Option<RunnerError> {
    match reply {
        Reply::Output(_) => None,
        Reply::Timeout => Some(RunnerError::Timeout {
            command: command.to_string(),
            timeout: Duration::from_secs(1),
        }),
        Reply::SpawnFailure => Some(RunnerError::Spawn {
            command: command.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
        }),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str, out: &mut String) -> RunnerResult<()> {
        self.record(Call::Run(command.to_string()));
        if let Some(delay) = self.delays.get(command) {
            tokio::time::sleep(*delay).await;
        }
        match self.reply(command) {
            Reply::Output(text) => {
                out.push_str(&text);
                Ok(())
            }
            reply => Err(failure(command, &reply).unwrap()),
        }
    }

    async fn run_to_file(&self, command: &str, path: &Path) -> RunnerResult<()> {
        self.record(Call::RunToFile(command.to_string(), path.to_path_buf()));
        match failure(command, &self.reply(command)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute(&self, command: &str) -> RunnerResult<i32> {
        self.record(Call::Execute(command.to_string()));
        let scripted = self
            .exit_codes
            .iter()
            .find(|(prefix, _, _)| command.starts_with(prefix.as_str()));
        match scripted {
            Some((_, reply, code)) => match failure(command, reply) {
                Some(err) => Err(err),
                None => Ok(*code),
            },
            None => Ok(0),
        }
    }
}

/// A `free -L` line with the given used and free blocks
pub fn free_report(used: &str, free: &str) -> String {
    format!(
        "{:<8} {:>10} {:<8} {:>10} {:<8} {:>10} {:<8} {:>10} \n",
        "SwapUse", "0", "CachUse", "1024", "MemUse", used, "MemFree", free
    )
}

/// A `sar` tail whose idle column reads `idle`, right aligned to three characters
pub fn sar_report(idle: &str) -> String {
    format!(
        "12:00:01 AM     CPU     %user     %nice   %system   %iowait    %steal     %idle\n\
         12:00:02 AM     all        60         0         5         0         0       {:>3}\n\
         Average:        all        60         0         5         0         0       {:>3}\n",
        idle, idle
    )
}
