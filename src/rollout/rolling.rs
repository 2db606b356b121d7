//! Rolling-update phase.
//!
//! Existing containers are replaced in batches of up to `parallelism`,
//! with an injectable `delay` sleep between batches. `start-first`
//! brings replacements up and health-gates them before retiring old
//! containers; `stop-first` retires first and replaces after.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::engine::ContainerSummary;
use crate::error::{DeployError, DeployResult};
use crate::health::wait_for_healthy;
use crate::query::service_containers;

use super::{newcomers, BatchCounters, ServiceRollout, SharedCounters, UpdateOrder};

/// Counters accumulated across every batch of one rolling update.
#[derive(Debug, Default, Clone, Copy)]
pub struct RollingOutcome {
    pub total_updates: usize,
    pub failures: usize,
}

impl ServiceRollout {
    /// Replace `to_update` (oldest first) with fresh containers, batch
    /// by batch. Returns the accumulated update/failure counts.
    pub async fn rolling_update(
        &self,
        to_update: Vec<ContainerSummary>,
    ) -> DeployResult<RollingOutcome> {
        info!(
            current_replicas = to_update.len(),
            delay = ?self.settings.delay,
            parallelism = self.settings.parallelism,
            order = ?self.settings.order,
            "starting rolling update of existing containers"
        );

        let counters: SharedCounters = Arc::new(Mutex::new(BatchCounters::default()));
        let parallelism = self.settings.parallelism.max(1);
        let total = to_update.len();
        let mut processed = 0;

        for batch in to_update.chunks(parallelism) {
            match self.settings.order {
                UpdateOrder::StartFirst => self.start_first_batch(batch, &counters).await?,
                UpdateOrder::StopFirst => self.stop_first_batch(batch, &counters).await?,
            }

            processed += batch.len();
            if processed < total && !self.settings.delay.is_zero() {
                self.delay_between_batches().await?;
            }
        }

        let counters = counters.lock().await;
        Ok(RollingOutcome {
            total_updates: counters.total_updates,
            failures: counters.failures,
        })
    }

    /// Start-first: surge up by `|batch|`, health-gate the newcomers,
    /// and let each healthy newcomer retire at most one old container.
    async fn start_first_batch(
        &self,
        batch: &[ContainerSummary],
        counters: &SharedCounters,
    ) -> DeployResult<()> {
        let running = service_containers(
            self.engine.as_ref(),
            &self.compose.project_name,
            Some(&self.service_name),
            Some("running"),
        )
        .await?;

        let target_scale = running.len() + batch.len();
        self.compose
            .up_scaled(
                self.executor.as_ref(),
                &self.service_name,
                target_scale,
                &self.cancel,
            )
            .await?;

        let all = service_containers(
            self.engine.as_ref(),
            &self.compose.project_name,
            Some(&self.service_name),
            None,
        )
        .await?;
        let fresh = newcomers(all, &running, batch.len());

        // Old containers queue: each healthy newcomer dequeues at most
        // one, so every old container is retired at most once.
        let queue = Arc::new(Mutex::new(VecDeque::from(batch.to_vec())));

        let mut workers = JoinSet::new();
        for new_container in fresh {
            let worker = self.clone();
            let counters = Arc::clone(counters);
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                worker
                    .start_first_worker(new_container, counters, queue)
                    .await;
            });
        }
        while let Some(result) = workers.join_next().await {
            result.expect("rolling update worker panicked");
        }

        let snapshot = *counters.lock().await;
        self.check_failure_policy(&snapshot)
    }

    async fn start_first_worker(
        self,
        new_container: ContainerSummary,
        counters: SharedCounters,
        queue: Arc<Mutex<VecDeque<ContainerSummary>>>,
    ) {
        counters.lock().await.total_updates += 1;

        info!(
            container = %new_container.short_id(),
            "waiting for container to become healthy"
        );
        let health = wait_for_healthy(
            self.engine.as_ref(),
            self.executor.as_ref(),
            &new_container.id,
            &self.service_name,
            self.settings.monitor,
            &self.hooks.healthcheck,
            self.sleeper.as_ref(),
            &self.cancel,
        )
        .await;

        match health {
            Err(err) => {
                log_health_failure(&new_container, &err);
                counters.lock().await.failures += 1;
                self.cleanup_failed_container(&new_container.id).await;
            }
            Ok(()) => {
                let old = queue.lock().await.pop_front();
                match old {
                    Some(old) => {
                        info!(
                            container = %new_container.short_id(),
                            retiring = %old.display_name(),
                            "container is healthy, stopping old container"
                        );
                        if let Err(err) = self.retire_container(&old).await {
                            warn!(
                                container = %old.display_name(),
                                error = %err,
                                "error stopping old container"
                            );
                        }
                    }
                    None => {
                        info!(
                            container = %new_container.short_id(),
                            "container is healthy, nothing to retire"
                        );
                    }
                }
            }
        }
    }

    /// Stop-first: retire the whole batch, then scale back up and
    /// health-gate the replacements.
    async fn stop_first_batch(
        &self,
        batch: &[ContainerSummary],
        counters: &SharedCounters,
    ) -> DeployResult<()> {
        info!(count = batch.len(), "stopping old containers first");

        let mut stoppers = JoinSet::new();
        for container in batch.to_vec() {
            let worker = self.clone();
            stoppers.spawn(async move {
                info!(container = %container.display_name(), "stopping container");
                worker.retire_container(&container).await
            });
        }
        let mut first_error = None;
        while let Some(result) = stoppers.join_next().await {
            if let Err(err) = result.expect("stop worker panicked") {
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let current = service_containers(
            self.engine.as_ref(),
            &self.compose.project_name,
            Some(&self.service_name),
            None,
        )
        .await?;

        let target_scale = current.len() + batch.len();
        self.compose
            .up_scaled(
                self.executor.as_ref(),
                &self.service_name,
                target_scale,
                &self.cancel,
            )
            .await?;

        let all = service_containers(
            self.engine.as_ref(),
            &self.compose.project_name,
            Some(&self.service_name),
            None,
        )
        .await?;
        let fresh = newcomers(all, &current, batch.len());

        let mut workers = JoinSet::new();
        for new_container in fresh {
            let worker = self.clone();
            let counters = Arc::clone(counters);
            workers.spawn(async move {
                worker.health_gate_worker(new_container, counters).await;
            });
        }
        while let Some(result) = workers.join_next().await {
            result.expect("rolling update worker panicked");
        }

        let snapshot = *counters.lock().await;
        self.check_failure_policy(&snapshot)
    }

    /// Health-gate a replacement container; failures are counted and the
    /// container cleaned up.
    pub(crate) async fn health_gate_worker(
        self,
        new_container: ContainerSummary,
        counters: SharedCounters,
    ) {
        counters.lock().await.total_updates += 1;

        info!(
            container = %new_container.short_id(),
            "waiting for container to become healthy"
        );
        let health = wait_for_healthy(
            self.engine.as_ref(),
            self.executor.as_ref(),
            &new_container.id,
            &self.service_name,
            self.settings.monitor,
            &self.hooks.healthcheck,
            self.sleeper.as_ref(),
            &self.cancel,
        )
        .await;

        match health {
            Err(err) => {
                log_health_failure(&new_container, &err);
                counters.lock().await.failures += 1;
                self.cleanup_failed_container(&new_container.id).await;
            }
            Ok(()) => {
                info!(container = %new_container.short_id(), "container is healthy");
            }
        }
    }
}

fn log_health_failure(container: &ContainerSummary, err: &DeployError) {
    warn!(
        container = %container.short_id(),
        error = %err,
        "container failed health check, stopping"
    );
    if let Some(output) = err.output() {
        for line in output.lines() {
            warn!("    {line}");
        }
    }
}
