//! Narrow interface to the container engine.
//!
//! The deployer only needs list/inspect/start/rename/terminate, so the
//! [`ContainerEngine`] trait exposes exactly that over engine-agnostic
//! types. [`DockerEngine`] backs it with the daemon API via bollard;
//! [`MockEngine`] is exported for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bollard::container::{
    ListContainersOptions, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::HealthStatusEnum;
use bollard::Docker;
use thiserror::Error;

/// Grace period for stop before remove during terminate, in seconds.
const STOP_GRACE_SECS: i64 = 10;

/// Container engine operation failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("error creating engine client: {0}")]
    Connect(String),

    #[error("error listing containers: {0}")]
    List(String),

    #[error("error inspecting container: {0}")]
    Inspect(String),

    #[error("error starting container: {0}")]
    Start(String),

    #[error("error renaming container: {0}")]
    Rename(String),

    #[error("error terminating container: {0}")]
    Terminate(String),
}

/// Label/status filter for container listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// `key=value` label filters, all of which must match.
    pub labels: Vec<String>,
    /// Status filter (`running`, `created`, ...). All statuses when `None`.
    pub status: Option<String>,
}

/// One container as reported by a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Full hex id.
    pub id: String,
    /// Engine-reported names, each prefixed with `/`.
    pub names: Vec<String>,
    /// Creation time in seconds since the epoch.
    pub created: i64,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// First 12 characters of the id.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    /// Human-facing identity: the first name with the leading `/`
    /// stripped, falling back to the short id.
    pub fn display_name(&self) -> String {
        self.names
            .iter()
            .find_map(|name| name.strip_prefix('/'))
            .map(str::to_string)
            .unwrap_or_else(|| self.short_id().to_string())
    }
}

/// Engine-reported health of a container with a healthcheck configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Healthy,
    Unhealthy,
    /// Any other engine-reported state; callers keep waiting.
    Other,
}

/// Inspect result, reduced to what the deployer consumes.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetail {
    pub running: bool,
    /// `None` when the container has no healthcheck configured.
    pub health: Option<HealthState>,
    /// Declared network mode (`host`, `bridge`, a network name, ...).
    pub network_mode: String,
    /// Network name to endpoint IP address.
    pub networks: HashMap<String, String>,
}

/// Capability set the deployer needs from the engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError>;

    /// Stop with a grace period, then remove. Both failure modes surface
    /// as [`EngineError::Terminate`].
    async fn terminate(&self, id: &str) -> Result<(), EngineError>;
}

/// Engine client backed by the local daemon socket.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the standard environment (`DOCKER_HOST` etc.) with
    /// API version negotiation.
    pub fn connect() -> Result<Self, EngineError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| EngineError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("label".to_string(), filter.labels.clone());
        if let Some(status) = &filter.status {
            filters.insert("status".to_string(), vec![status.clone()]);
        }

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::List(e.to_string()))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                created: c.created.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, EngineError> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| EngineError::Inspect(e.to_string()))?;

        let state = response.state.unwrap_or_default();
        let health = state.health.and_then(|h| match h.status {
            Some(HealthStatusEnum::STARTING) => Some(HealthState::Starting),
            Some(HealthStatusEnum::HEALTHY) => Some(HealthState::Healthy),
            Some(HealthStatusEnum::UNHEALTHY) => Some(HealthState::Unhealthy),
            Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) | None => None,
        });

        let network_mode = response
            .host_config
            .and_then(|hc| hc.network_mode)
            .unwrap_or_default();

        let networks = response
            .network_settings
            .and_then(|ns| ns.networks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, endpoint)| endpoint.ip_address.map(|ip| (name, ip)))
            .collect();

        Ok(ContainerDetail {
            running: state.running.unwrap_or(false),
            health,
            network_mode,
            networks,
        })
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::Start(e.to_string()))
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError> {
        self.docker
            .rename_container(id, RenameContainerOptions { name })
            .await
            .map_err(|e| EngineError::Rename(e.to_string()))
    }

    async fn terminate(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
            .map_err(|e| EngineError::Terminate(format!("error stopping container: {e}")))?;

        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| EngineError::Terminate(format!("error removing container: {e}")))
    }
}

type ListFn = dyn Fn(&ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError> + Send + Sync;
type InspectFn = dyn Fn(&str) -> Result<ContainerDetail, EngineError> + Send + Sync;
type StartFn = dyn Fn(&str) -> Result<(), EngineError> + Send + Sync;
type TerminateFn = dyn Fn(&str) -> Result<(), EngineError> + Send + Sync;
type RenameFn = dyn Fn(&str, &str) -> Result<(), EngineError> + Send + Sync;

/// Closure-driven engine double for tests.
///
/// Mutating operations are recorded regardless of the configured
/// closures; unconfigured operations succeed (lists are empty, inspects
/// report a running container without a healthcheck).
#[derive(Default)]
pub struct MockEngine {
    list_fn: Option<Box<ListFn>>,
    inspect_fn: Option<Box<InspectFn>>,
    start_fn: Option<Box<StartFn>>,
    terminate_fn: Option<Box<TerminateFn>>,
    rename_fn: Option<Box<RenameFn>>,
    list_calls: AtomicUsize,
    started: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
    renamed: Mutex<Vec<(String, String)>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(
        mut self,
        f: impl Fn(&ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.list_fn = Some(Box::new(f));
        self
    }

    pub fn with_inspect(
        mut self,
        f: impl Fn(&str) -> Result<ContainerDetail, EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.inspect_fn = Some(Box::new(f));
        self
    }

    pub fn with_start(
        mut self,
        f: impl Fn(&str) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.start_fn = Some(Box::new(f));
        self
    }

    pub fn with_terminate(
        mut self,
        f: impl Fn(&str) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.terminate_fn = Some(Box::new(f));
        self
    }

    pub fn with_rename(
        mut self,
        f: impl Fn(&str, &str) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.rename_fn = Some(Box::new(f));
        self
    }

    /// Ids started so far, in order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Ids terminated so far, in order.
    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    /// `(id, new_name)` pairs renamed so far, in order.
    pub fn renamed(&self) -> Vec<(String, String)> {
        self.renamed.lock().unwrap().clone()
    }

    /// Number of list calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerSummary>, EngineError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match &self.list_fn {
            Some(f) => f(filter),
            None => Ok(Vec::new()),
        }
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetail, EngineError> {
        match &self.inspect_fn {
            Some(f) => f(id),
            None => Ok(ContainerDetail {
                running: true,
                ..ContainerDetail::default()
            }),
        }
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.started.lock().unwrap().push(id.to_string());
        match &self.start_fn {
            Some(f) => f(id),
            None => Ok(()),
        }
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError> {
        self.renamed
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
        match &self.rename_fn {
            Some(f) => f(id, name),
            None => Ok(()),
        }
    }

    async fn terminate(&self, id: &str) -> Result<(), EngineError> {
        self.terminated.lock().unwrap().push(id.to_string());
        match &self.terminate_fn {
            Some(f) => f(id),
            None => Ok(()),
        }
    }
}
