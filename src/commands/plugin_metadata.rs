//! `docker-cli-plugin-metadata`: the handshake Docker uses to register
//! CLI plugins.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

#[derive(Debug, Args)]
pub struct PluginMetadataCommand {}

#[derive(Debug, Serialize)]
struct PluginMetadata {
    #[serde(rename = "SchemaVersion")]
    schema_version: &'static str,
    #[serde(rename = "Vendor")]
    vendor: &'static str,
    #[serde(rename = "Version")]
    version: &'static str,
    #[serde(rename = "ShortDescription")]
    short_description: &'static str,
}

impl PluginMetadataCommand {
    pub fn run(self) -> Result<()> {
        let metadata = PluginMetadata {
            schema_version: "0.1.0",
            vendor: "Jose Diaz-Gonzalez",
            version: env!("CARGO_PKG_VERSION"),
            short_description: "Deploy a Compose service",
        };

        println!("{}", serde_json::to_string_pretty(&metadata)?);
        Ok(())
    }
}
