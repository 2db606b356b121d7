//! Deploy command: reconcile a Compose project (or one service) with
//! rolling updates.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::TokioSleeper;
use crate::deploy::{deploy_project, deploy_service, DeployOptions};
use crate::engine::DockerEngine;
use crate::exec::SystemExecutor;
use crate::manifest;

/// Default container name convention.
const DEFAULT_NAME_TEMPLATE: &str = "{{.ProjectName}}-{{.ServiceName}}-{{.InstanceID}}";

#[derive(Debug, Args)]
pub struct DeployCommand {
    /// Service to deploy; the whole project when omitted.
    service_name: Option<String>,

    /// Number of replicas to deploy (requires a service name).
    #[arg(long, default_value_t = 0)]
    replicas: u32,

    /// Profiles to enable. Repeatable, comma-separable.
    #[arg(long = "profile", value_delimiter = ',')]
    profiles: Vec<String>,

    /// Template for container names.
    #[arg(long, default_value = DEFAULT_NAME_TEMPLATE)]
    container_name_template: String,

    /// Path to the Compose file. Discovered in the current directory
    /// when omitted.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Path to the project directory. Defaults to the Compose file's
    /// directory.
    #[arg(long)]
    project_directory: Option<PathBuf>,

    /// Name of the project. Defaults to the project directory's name.
    #[arg(long)]
    project_name: Option<String>,

    /// Skip services that use known database images.
    #[arg(long)]
    skip_databases: bool,
}

impl DeployCommand {
    pub async fn run(self) -> Result<()> {
        let compose_file = match self.file {
            Some(file) => file
                .canonicalize()
                .with_context(|| format!("compose file {} not readable", file.display()))?,
            None => {
                let cwd = std::env::current_dir().context("cannot resolve current directory")?;
                manifest::find_compose_file(&cwd)?
            }
        };

        let project_directory = self
            .project_directory
            .unwrap_or_else(|| {
                compose_file
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."))
            });

        let project_name = self.project_name.unwrap_or_else(|| {
            project_directory
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        if project_name.is_empty() {
            bail!("project name is required");
        }

        let project = manifest::load_project(&compose_file, &project_name, &self.profiles)?;

        let engine = Arc::new(DockerEngine::connect()?);
        let executor = Arc::new(SystemExecutor);

        // Ctrl-C pauses the deploy in place; partial state is left as-is.
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_cancel.cancel();
            }
        });

        let options = DeployOptions {
            engine,
            executor,
            compose_file: compose_file.clone(),
            project_name,
            container_name_template: self.container_name_template,
            skip_databases: self.skip_databases,
            replicas_override: (self.replicas > 0).then_some(self.replicas),
            sleeper: Arc::new(TokioSleeper),
            cancel,
        };

        match self.service_name {
            None => {
                if self.replicas > 0 {
                    bail!("--replicas flag requires a service name argument");
                }

                info!(file = %compose_file.display(), "deploying entire project");
                deploy_project(&project, &options).await?;
                info!("entire project deployed");
            }
            Some(service_name) => {
                info!(service = %service_name, "deploying service");
                deploy_service(&project, &service_name, &options).await?;
            }
        }

        Ok(())
    }
}
