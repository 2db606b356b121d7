//! Health gating for freshly created containers.
//!
//! Every new replica passes two stages before it counts as live:
//!
//! 1. Engine-reported health, polled at the `monitor` interval with a
//!    hard deadline of twice the interval. Containers without a
//!    healthcheck config count as healthy once running.
//! 2. The optional `x-healthcheck-host-command` script, run on the host.
//!
//! Failure at either stage fails the wait.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::clock::Sleeper;
use crate::engine::{ContainerEngine, HealthState};
use crate::error::{DeployError, DeployResult};
use crate::exec::CommandExecutor;
use crate::hooks::{run_hook, HookKind};

/// Block until the container is healthy or the wait fails.
#[allow(clippy::too_many_arguments)]
pub async fn wait_for_healthy(
    engine: &dyn ContainerEngine,
    executor: &dyn CommandExecutor,
    container_id: &str,
    service_name: &str,
    monitor: Duration,
    healthcheck_source: &str,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
) -> DeployResult<()> {
    wait_for_engine_health(engine, container_id, monitor, sleeper, cancel).await?;

    run_hook(
        engine,
        executor,
        container_id,
        service_name,
        healthcheck_source,
        HookKind::Healthcheck,
        cancel,
    )
    .await
}

/// Stage one: poll the engine until the container reports healthy.
async fn wait_for_engine_health(
    engine: &dyn ContainerEngine,
    container_id: &str,
    monitor: Duration,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
) -> DeployResult<()> {
    let monitor = if monitor.is_zero() {
        Duration::from_millis(1)
    } else {
        monitor
    };
    let max_wait = monitor * 2;
    let deadline = Instant::now() + max_wait;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = sleeper.sleep(monitor) => {}
        }

        if Instant::now() > deadline {
            return Err(DeployError::HealthTimeout(max_wait));
        }

        let detail = engine.inspect(container_id).await?;
        match detail.health {
            // No healthcheck configured: running is as healthy as it gets.
            None => {
                if detail.running {
                    return Ok(());
                }
                return Err(DeployError::NotRunning);
            }
            Some(HealthState::Healthy) => return Ok(()),
            Some(HealthState::Unhealthy) => return Err(DeployError::Unhealthy),
            Some(HealthState::Starting) | Some(HealthState::Other) => {}
        }
    }
}
