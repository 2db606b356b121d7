//! docker-orchestrate: rolling-update deployer for compose projects.
//!
//! Installs as a Docker CLI plugin (`docker orchestrate deploy`) or runs
//! standalone (`docker-orchestrate deploy`).

use std::ffi::OsString;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docker_orchestrate::commands::Cli;
use docker_orchestrate::error;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // When invoked through Docker as a plugin, the plugin name is
    // injected as the first argument. Strip it so clap sees `deploy`.
    let mut args: Vec<OsString> = std::env::args_os().collect();
    if args.len() > 1 && args[1] == "orchestrate" {
        args.remove(1);
    }

    let cli = Cli::parse_from(args);
    if let Err(err) = cli.run().await {
        error::print_error(&err);
        std::process::exit(1);
    }

    Ok(())
}
