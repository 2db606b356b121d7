//! Error types and display for the deployer.

use std::time::Duration;

use colored::Colorize;
use thiserror::Error;

use crate::engine::EngineError;
use crate::exec::ExecError;

/// Errors produced while deploying a project or service.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration problems: missing compose file, unknown service,
    /// unsupported manifest values, bad flag combinations.
    #[error("{0}")]
    Config(String),

    /// A container engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An external process exited non-zero. Carries the captured output.
    #[error("{context}")]
    Command { context: String, output: String },

    /// A name or host-script template failed to parse or render.
    #[error("template error: {0}")]
    Template(String),

    /// Engine-reported health never settled within the monitor window.
    #[error("health check timeout after {0:?}")]
    HealthTimeout(Duration),

    /// A container without a health check config is not running.
    #[error("container is not running")]
    NotRunning,

    /// The engine reported the container unhealthy.
    #[error("container is unhealthy")]
    Unhealthy,

    /// The per-reconciliation failure ratio crossed the configured limit.
    #[error(
        "max failure ratio exceeded ({ratio:.2} > {max:.2}){}",
        if *paused { ", pausing deployment" } else { "" }
    )]
    RatioExceeded { ratio: f64, max: f64, paused: bool },

    /// `failure_action: pause` with at least one failure in a batch.
    #[error("deployment paused due to failure (failure_action: pause)")]
    Paused,

    /// The ambient cancellation token fired.
    #[error("deployment cancelled")]
    Cancelled,
}

impl From<ExecError> for DeployError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Cancelled => DeployError::Cancelled,
            ExecError::Spawn { .. } => DeployError::Command {
                context: err.to_string(),
                output: String::new(),
            },
            ExecError::NonZeroExit { ref output, .. } => DeployError::Command {
                context: err.to_string(),
                output: output.combined_trimmed(),
            },
        }
    }
}

impl DeployError {
    /// Captured process output attached to this error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            DeployError::Command { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }
}

/// Print an error in a user-friendly format on stderr.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    // Deployment errors may carry captured process output worth showing.
    if let Some(deploy_err) = err.downcast_ref::<DeployError>() {
        if let Some(output) = deploy_err.output() {
            for line in output.lines() {
                eprintln!("    {}", line);
            }
        }
    }
}

/// Result type for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_message_plain() {
        let err = DeployError::RatioExceeded {
            ratio: 0.5,
            max: 0.1,
            paused: false,
        };
        assert_eq!(err.to_string(), "max failure ratio exceeded (0.50 > 0.10)");
    }

    #[test]
    fn ratio_message_paused() {
        let err = DeployError::RatioExceeded {
            ratio: 1.0,
            max: 0.25,
            paused: true,
        };
        assert_eq!(
            err.to_string(),
            "max failure ratio exceeded (1.00 > 0.25), pausing deployment"
        );
    }

    #[test]
    fn command_error_exposes_output() {
        let err = DeployError::Command {
            context: "healthcheck command failed".into(),
            output: "connection refused".into(),
        };
        assert_eq!(err.output(), Some("connection refused"));
        assert!(DeployError::Paused.output().is_none());
    }
}
