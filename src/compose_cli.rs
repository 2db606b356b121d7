//! Compose CLI invocations.
//!
//! Creation goes through `docker compose` rather than the engine API
//! because only compose implements the scale-preserving `--no-recreate`
//! semantics. Termination and inspection stay on the engine API, which
//! returns structured results.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::error::DeployResult;
use crate::exec::{CommandExecutor, ExecRequest};

/// Invokes `docker compose` for one project.
#[derive(Debug, Clone)]
pub struct ComposeCli {
    pub compose_file: PathBuf,
    pub project_name: String,
    pub project_dir: PathBuf,
}

impl ComposeCli {
    pub fn new(
        compose_file: impl Into<PathBuf>,
        project_name: impl Into<String>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            compose_file: compose_file.into(),
            project_name: project_name.into(),
            project_dir: project_dir.into(),
        }
    }

    /// `docker compose up --detach --scale <service>=<scale> --no-deps
    /// --no-recreate <service>`: bring the service to `scale` without
    /// touching existing containers or dependencies.
    pub async fn up_scaled(
        &self,
        executor: &dyn CommandExecutor,
        service: &str,
        scale: usize,
        cancel: &CancellationToken,
    ) -> DeployResult<()> {
        let request = ExecRequest::new(
            "docker",
            vec![
                "compose".into(),
                "-f".into(),
                self.compose_file.to_string_lossy().into_owned(),
                "-p".into(),
                self.project_name.clone(),
                "up".into(),
                "--detach".into(),
                "--scale".into(),
                format!("{service}={scale}"),
                "--no-deps".into(),
                "--no-recreate".into(),
                service.into(),
            ],
        )
        .in_dir(&self.project_dir);

        executor.run(request, cancel).await?;
        Ok(())
    }

    /// `docker compose create --scale <service>=<scale> <service>`:
    /// create containers up to `scale` without starting them.
    pub async fn create_scaled(
        &self,
        executor: &dyn CommandExecutor,
        service: &str,
        scale: usize,
        cancel: &CancellationToken,
    ) -> DeployResult<()> {
        let request = ExecRequest::new(
            "docker",
            vec![
                "compose".into(),
                "-f".into(),
                self.compose_file.to_string_lossy().into_owned(),
                "-p".into(),
                self.project_name.clone(),
                "create".into(),
                "--scale".into(),
                format!("{service}={scale}"),
                service.into(),
            ],
        )
        .in_dir(&self.project_dir);

        executor.run(request, cancel).await?;
        Ok(())
    }
}
