//! External command execution for the bulk-copy client

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// A fully described process invocation
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment variables; values may be secrets and are never logged
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("envs", &env_keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What a finished process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external processes (dependency injection seam for the loader)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, or fail once `spec.timeout` elapses
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(?spec, "Spawning process");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IngestError::load(format!("failed to start {}: {e}", spec.program.display()))
            })?;

        // On timeout the child is dropped, which kills it
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                IngestError::load(format!("failed waiting for {}: {e}", spec.program.display()))
            })?,
            Err(_) => {
                return Err(IngestError::load(format!(
                    "{} did not finish within {}s and was killed",
                    spec.program.display(),
                    spec.timeout.as_secs()
                )))
            },
        };

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
