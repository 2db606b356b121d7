//! Scale-down phase: retire the oldest excess containers.

use tracing::info;

use crate::engine::ContainerSummary;
use crate::error::DeployResult;
use crate::query::sort_by_created;

use super::ServiceRollout;

impl ServiceRollout {
    /// Terminate `current.len() - desired` containers, oldest first,
    /// running the stop hooks around each terminate. Hook failures are
    /// logged and swallowed; a terminate failure aborts immediately.
    pub async fn scale_down(
        &self,
        mut current: Vec<ContainerSummary>,
        desired: usize,
    ) -> DeployResult<()> {
        info!(
            current_replicas = current.len(),
            target_replicas = desired,
            "scaling down containers"
        );

        let to_remove = current.len().saturating_sub(desired);
        if to_remove == 0 {
            return Ok(());
        }

        sort_by_created(&mut current, false);

        for container in &current[..to_remove] {
            info!(container = %container.display_name(), "stopping container");
            self.retire_container(container).await?;
        }

        Ok(())
    }
}
