//! Rolling-update deployer for compose projects.
//!
//! Deploys a multi-service compose project onto a single local container
//! engine, replacing the engine's recreate behaviour with a rolling
//! update scheduler driven by `deploy.update_config` (parallelism,
//! delay, order, monitor, max_failure_ratio, failure_action) plus
//! host-side lifecycle scripts.
//!
//! ## Modules
//!
//! - `deploy`: per-service reconciler and project driver
//! - `rollout`: scale-down / rolling-update / scale-up batch operators
//! - `health`: two-stage health gating for new containers
//! - `hooks`: host-side lifecycle scripts
//! - `engine`: narrow container engine interface (daemon API)
//! - `compose_cli`: `docker compose up/create --scale` invocations
//! - `manifest`: compose model, discovery, dependency order

pub mod clock;
pub mod commands;
pub mod compose_cli;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod exec;
pub mod health;
pub mod hooks;
pub mod image;
pub mod manifest;
pub mod query;
pub mod rollout;
pub mod template;

// Re-export commonly used types
pub use deploy::{deploy_project, deploy_service, DeployOptions, DeployOutcome};
pub use engine::{ContainerEngine, DockerEngine, MockEngine};
pub use error::{DeployError, DeployResult};
