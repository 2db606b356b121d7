//! CLI commands.

mod deploy;
mod plugin_metadata;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Deploy compose projects with rolling updates.
#[derive(Debug, Parser)]
#[command(name = "docker-orchestrate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy a Compose project or a single service.
    Deploy(deploy::DeployCommand),

    /// Print the Docker CLI plugin metadata.
    #[command(name = "docker-cli-plugin-metadata", hide = true)]
    DockerCliPluginMetadata(plugin_metadata::PluginMetadataCommand),
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Deploy(cmd) => cmd.run().await,
            Commands::DockerCliPluginMetadata(cmd) => cmd.run(),
        }
    }
}
