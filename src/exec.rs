//! External process execution.
//!
//! Everything the deployer runs on the host (the compose CLI, rendered
//! lifecycle scripts) goes through the [`CommandExecutor`] seam so tests
//! can script responses without touching the system.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A single process invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Program to invoke.
    pub program: String,
    /// Arguments, not including the program itself.
    pub args: Vec<String>,
    /// Working directory for the child; inherits ours when `None`.
    pub working_dir: Option<PathBuf>,
}

impl ExecRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Stdout with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Stderr with surrounding whitespace removed.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }

    /// Both streams as one trimmed blob, stdout first.
    pub fn combined_trimmed(&self) -> String {
        let mut combined = String::new();
        combined.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stderr.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&self.stderr);
        combined.trim().to_string()
    }
}

/// Process execution failures.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {exit_code}")]
    NonZeroExit {
        program: String,
        exit_code: i32,
        output: ExecOutput,
    },

    #[error("command cancelled")]
    Cancelled,
}

/// Runs host processes with stdout/stderr capture and cancellation.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the process to completion. Non-zero exit is an error carrying
    /// the captured output. Cancellation kills the child.
    async fn run(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError>;
}

/// Executor backed by real host processes.
pub struct SystemExecutor;

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn run(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        // Dropping the in-flight future kills the child via kill_on_drop.
        let raw = tokio::select! {
            result = cmd.output() => result.map_err(|e| ExecError::Spawn {
                program: request.program.clone(),
                message: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        };

        let output = ExecOutput {
            exit_code: raw.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };

        if !raw.status.success() {
            return Err(ExecError::NonZeroExit {
                program: request.program,
                exit_code: output.exit_code,
                output,
            });
        }

        Ok(output)
    }
}

type ExecHandler = dyn Fn(&ExecRequest) -> Result<ExecOutput, ExecError> + Send + Sync;

/// Scripted executor for tests: records every request and replays a
/// configured handler (success with empty output by default).
///
/// Exposed from the library so integration tests can drive the deployer
/// without spawning processes.
pub struct ScriptedExecutor {
    handler: Option<Box<ExecHandler>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&ExecRequest) -> Result<ExecOutput, ExecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests seen so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        request: ExecRequest,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.handler {
            Some(handler) => handler(&request),
            None => Ok(ExecOutput::default()),
        }
    }
}
