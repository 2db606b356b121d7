//! Scale-up phase: create missing replicas and start them in batches.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::engine::ContainerSummary;
use crate::error::{DeployError, DeployResult};
use crate::health::wait_for_healthy;
use crate::query::service_containers;

use super::{BatchCounters, ServiceRollout, SharedCounters};

impl ServiceRollout {
    /// Create containers up to `desired` (without starting them), then
    /// start the newly created ones in parallelism-sized batches, each
    /// start gated by the health waiter.
    pub async fn scale_up(
        &self,
        existing: &[ContainerSummary],
        desired: usize,
    ) -> DeployResult<()> {
        info!(
            current_replicas = existing.len(),
            parallelism = self.settings.parallelism,
            target_replicas = desired,
            "scaling up containers"
        );

        self.compose
            .create_scaled(self.executor.as_ref(), &self.service_name, desired, &self.cancel)
            .await?;

        let all = service_containers(
            self.engine.as_ref(),
            &self.compose.project_name,
            Some(&self.service_name),
            None,
        )
        .await?;

        let created: Vec<ContainerSummary> = all
            .into_iter()
            .filter(|c| !existing.iter().any(|e| e.id == c.id))
            .collect();

        if created.is_empty() {
            info!("no created containers to start");
            return Ok(());
        }

        let counters: SharedCounters = Arc::new(Mutex::new(BatchCounters::default()));
        // First start error; only consulted when the ratio gate is off.
        let batch_error: Arc<Mutex<Option<DeployError>>> = Arc::new(Mutex::new(None));

        let parallelism = self.settings.parallelism.max(1);
        let total = created.len();
        let mut processed = 0;

        for batch in created.chunks(parallelism) {
            let mut workers = JoinSet::new();
            for container in batch.to_vec() {
                let worker = self.clone();
                let counters = Arc::clone(&counters);
                let batch_error = Arc::clone(&batch_error);
                workers.spawn(async move {
                    worker
                        .start_and_gate_worker(container, counters, batch_error)
                        .await;
                });
            }
            while let Some(result) = workers.join_next().await {
                result.expect("scale-up worker panicked");
            }

            let snapshot = *counters.lock().await;
            self.check_failure_policy(&snapshot)?;

            if self.settings.max_failure_ratio == 0.0 {
                if let Some(err) = batch_error.lock().await.take() {
                    return Err(err);
                }
            }

            processed += batch.len();
            if processed < total && !self.settings.delay.is_zero() {
                self.delay_between_batches().await?;
            }
        }

        Ok(())
    }

    async fn start_and_gate_worker(
        self,
        container: ContainerSummary,
        counters: SharedCounters,
        batch_error: Arc<Mutex<Option<DeployError>>>,
    ) {
        counters.lock().await.total_updates += 1;

        if let Err(err) = self.engine.start(&container.id).await {
            warn!(
                container = %container.short_id(),
                error = %err,
                "error starting container"
            );
            counters.lock().await.failures += 1;
            batch_error.lock().await.get_or_insert(DeployError::from(err));
            return;
        }

        info!(
            container = %container.short_id(),
            "waiting for container to become healthy"
        );
        let health = wait_for_healthy(
            self.engine.as_ref(),
            self.executor.as_ref(),
            &container.id,
            &self.service_name,
            self.settings.monitor,
            &self.hooks.healthcheck,
            self.sleeper.as_ref(),
            &self.cancel,
        )
        .await;

        if let Err(err) = health {
            warn!(
                container = %container.short_id(),
                error = %err,
                "container failed health check"
            );
            if let Some(output) = err.output() {
                for line in output.lines() {
                    warn!("    {line}");
                }
            }

            counters.lock().await.failures += 1;
            batch_error.lock().await.get_or_insert(err);
            self.cleanup_failed_container(&container.id).await;
        }
    }
}
