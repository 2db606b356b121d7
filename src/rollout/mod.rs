//! Batch-wise replica set transitions for one service.
//!
//! A reconciliation moves a service through up to three ordered phases:
//! scale-down, rolling update, scale-up. Phases are sequential; inside a
//! batch, work on new containers runs in parallel up to the configured
//! parallelism. The engine is re-queried before every decision, so no
//! state is carried between invocations.

mod rolling;
mod scale_down;
mod scale_up;

pub use rolling::RollingOutcome;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Sleeper;
use crate::compose_cli::ComposeCli;
use crate::engine::{ContainerEngine, ContainerSummary};
use crate::error::{DeployError, DeployResult};
use crate::exec::CommandExecutor;
use crate::hooks::{run_stop_hook_logged, HookKind, HookScripts};
use crate::query::sort_by_created;

/// Whether new replicas come up before or after old ones go down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrder {
    StartFirst,
    StopFirst,
}

/// What to do when a batch produces failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    /// Keep going; only the failure ratio can abort.
    #[default]
    Continue,
    /// Abort on any failure and leave the system as-is.
    Pause,
}

/// Resolved `deploy.update_config` values for one service.
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub parallelism: usize,
    pub delay: Duration,
    pub monitor: Duration,
    pub max_failure_ratio: f64,
    pub failure_action: FailureAction,
    pub order: UpdateOrder,
}

/// Everything a service transition needs: the engine, the compose CLI,
/// the hook scripts, and the resolved update settings. Cloning is cheap
/// (shared handles), which is how batch workers get their own copy.
#[derive(Clone)]
pub struct ServiceRollout {
    pub engine: Arc<dyn ContainerEngine>,
    pub executor: Arc<dyn CommandExecutor>,
    pub compose: ComposeCli,
    pub service_name: String,
    pub hooks: Arc<HookScripts>,
    pub settings: UpdateSettings,
    pub sleeper: Arc<dyn Sleeper>,
    pub cancel: CancellationToken,
}

/// Failure accounting for one reconciliation. Both counters live under
/// one lock so the ratio check observes a consistent pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchCounters {
    pub total_updates: usize,
    pub failures: usize,
}

impl ServiceRollout {
    /// Ratio and pause gates, evaluated after every batch.
    pub(crate) fn check_failure_policy(&self, counters: &BatchCounters) -> DeployResult<()> {
        let ratio = if counters.total_updates == 0 {
            0.0
        } else {
            counters.failures as f64 / counters.total_updates as f64
        };

        if self.settings.max_failure_ratio > 0.0 && ratio > self.settings.max_failure_ratio {
            return Err(DeployError::RatioExceeded {
                ratio,
                max: self.settings.max_failure_ratio,
                paused: self.settings.failure_action == FailureAction::Pause,
            });
        }

        if self.settings.failure_action == FailureAction::Pause && counters.failures > 0 {
            return Err(DeployError::Paused);
        }

        Ok(())
    }

    /// Injectable, cancellable sleep between batches.
    pub(crate) async fn delay_between_batches(&self) -> DeployResult<()> {
        info!(delay = ?self.settings.delay, "waiting before next batch");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeployError::Cancelled),
            _ = self.sleeper.sleep(self.settings.delay) => Ok(()),
        }
    }

    /// Retire a container that failed its health gate: best-effort stop
    /// hooks and terminate, nothing raised.
    pub(crate) async fn cleanup_failed_container(&self, container_id: &str) {
        run_stop_hook_logged(
            self.engine.as_ref(),
            self.executor.as_ref(),
            container_id,
            &self.service_name,
            &self.hooks.pre_stop,
            HookKind::PreStop,
            &self.cancel,
        )
        .await;

        if let Err(err) = self.engine.terminate(container_id).await {
            warn!(
                container = %&container_id[..container_id.len().min(12)],
                error = %err,
                "error terminating failed container"
            );
        }

        run_stop_hook_logged(
            self.engine.as_ref(),
            self.executor.as_ref(),
            container_id,
            &self.service_name,
            &self.hooks.post_stop,
            HookKind::PostStop,
            &self.cancel,
        )
        .await;
    }

    /// Stop hooks around a terminate whose error the caller handles.
    pub(crate) async fn retire_container(
        &self,
        container: &ContainerSummary,
    ) -> Result<(), DeployError> {
        run_stop_hook_logged(
            self.engine.as_ref(),
            self.executor.as_ref(),
            &container.id,
            &self.service_name,
            &self.hooks.pre_stop,
            HookKind::PreStop,
            &self.cancel,
        )
        .await;

        let result = self.engine.terminate(&container.id).await;

        run_stop_hook_logged(
            self.engine.as_ref(),
            self.executor.as_ref(),
            &container.id,
            &self.service_name,
            &self.hooks.post_stop,
            HookKind::PostStop,
            &self.cancel,
        )
        .await;

        result.map_err(DeployError::from)
    }
}

/// Containers in `all` that were not part of `known`, capped to the
/// `limit` newest.
pub(crate) fn newcomers(
    all: Vec<ContainerSummary>,
    known: &[ContainerSummary],
    limit: usize,
) -> Vec<ContainerSummary> {
    let mut fresh: Vec<ContainerSummary> = all
        .into_iter()
        .filter(|c| !known.iter().any(|k| k.id == c.id))
        .collect();

    if fresh.len() > limit {
        sort_by_created(&mut fresh, true);
        fresh.truncate(limit);
    }

    fresh
}

/// Shared handle to the counters for worker tasks.
pub(crate) type SharedCounters = Arc<Mutex<BatchCounters>>;
