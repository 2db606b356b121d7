//! Label-filtered container queries.
//!
//! The engine is the source of truth for the replica set, so every
//! decision re-reads it through these helpers. Containers belonging to a
//! compose project carry the `com.docker.compose.project` and
//! `com.docker.compose.service` labels.

use crate::engine::{ContainerEngine, ContainerFilter, ContainerSummary, EngineError};

/// Label the engine sets for the owning project.
pub const PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label the engine sets for the owning service.
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// List the containers for a project (optionally narrowed to one service
/// and/or one status). Without a status filter, containers in every
/// state are returned.
pub async fn service_containers(
    engine: &dyn ContainerEngine,
    project: &str,
    service: Option<&str>,
    status: Option<&str>,
) -> Result<Vec<ContainerSummary>, EngineError> {
    let mut labels = vec![format!("{PROJECT_LABEL}={project}")];
    if let Some(service) = service {
        labels.push(format!("{SERVICE_LABEL}={service}"));
    }

    let filter = ContainerFilter {
        labels,
        status: status.map(str::to_string),
    };

    engine.list(&filter).await
}

/// Sort containers by creation time. The sort is stable: containers with
/// equal `created` keep their input order.
pub fn sort_by_created(containers: &mut [ContainerSummary], newest_first: bool) {
    if newest_first {
        containers.sort_by(|a, b| b.created.cmp(&a.created));
    } else {
        containers.sort_by(|a, b| a.created.cmp(&b.created));
    }
}
