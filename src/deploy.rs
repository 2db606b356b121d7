//! Service reconciliation and project deployment.
//!
//! Per service, reconciliation converges the engine-observed replica set
//! to the desired count in three ordered phases (scale-down, rolling
//! update, scale-up), then renames survivors to the naming convention.
//! The engine is re-queried between phases; nothing is persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::Sleeper;
use crate::compose_cli::ComposeCli;
use crate::engine::{ContainerEngine, ContainerSummary};
use crate::error::{DeployError, DeployResult};
use crate::exec::CommandExecutor;
use crate::hooks::HookScripts;
use crate::image;
use crate::manifest::{parse_duration, Project, Service, UpdateConfig};
use crate::query::{service_containers, sort_by_created};
use crate::rollout::{FailureAction, RollingOutcome, ServiceRollout, UpdateOrder, UpdateSettings};
use crate::template::Template;

/// Defaults used when a service declares no `update_config` at all.
const DEFAULT_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_MONITOR: Duration = Duration::from_secs(5);

/// Shared wiring for one deploy invocation.
pub struct DeployOptions {
    pub engine: Arc<dyn ContainerEngine>,
    pub executor: Arc<dyn CommandExecutor>,
    pub compose_file: PathBuf,
    pub project_name: String,
    pub container_name_template: String,
    pub skip_databases: bool,
    /// Overrides the manifest's replica count; per-service deploys only.
    pub replicas_override: Option<u32>,
    pub sleeper: Arc<dyn Sleeper>,
    pub cancel: CancellationToken,
}

/// Result of one service reconciliation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeployOutcome {
    pub expected: usize,
    pub actual: usize,
    pub failures: usize,
}

/// Deploy every service in the project. A dependency-free `web` service
/// goes first; the rest follow in dependency order. The first failed
/// service aborts the project.
pub async fn deploy_project(project: &Project, options: &DeployOptions) -> DeployResult<()> {
    let mut web_deployed = false;
    if let Some(web) = project.service("web") {
        if web.depends_on.is_empty() {
            info!(service = "web", "deploying service");
            deploy_service(project, "web", options).await?;
            web_deployed = true;
        }
    }

    let order = project
        .dependency_order()
        .map_err(|e| DeployError::Config(e.to_string()))?;

    for service_name in order {
        if service_name == "web" && web_deployed {
            continue;
        }
        info!(service = %service_name, "deploying service");
        deploy_service(project, &service_name, options).await?;
    }

    Ok(())
}

/// Reconcile a single service to its desired replica count.
pub async fn deploy_service(
    project: &Project,
    service_name: &str,
    options: &DeployOptions,
) -> DeployResult<DeployOutcome> {
    if options.compose_file.as_os_str().is_empty() {
        return Err(DeployError::Config("compose file is required".into()));
    }
    if options.project_name.is_empty() {
        return Err(DeployError::Config("project name is required".into()));
    }
    if service_name.is_empty() {
        return Err(DeployError::Config("service name is required".into()));
    }

    let service = project.service(service_name).ok_or_else(|| {
        DeployError::Config(format!("service {service_name} not found in compose file"))
    })?;

    if should_skip_service(service, options.skip_databases) {
        return Ok(DeployOutcome::default());
    }

    let replicas = resolve_replicas(service, options.replicas_override);
    let (settings, hooks) = resolve_update_settings(service)?;

    let project_dir = options
        .compose_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let rollout = ServiceRollout {
        engine: Arc::clone(&options.engine),
        executor: Arc::clone(&options.executor),
        compose: ComposeCli::new(&options.compose_file, &options.project_name, project_dir),
        service_name: service_name.to_string(),
        hooks: Arc::new(hooks),
        settings,
        sleeper: Arc::clone(&options.sleeper),
        cancel: options.cancel.clone(),
    };

    // Phase 1: shed excess replicas before updating anything.
    let current = running_containers(options, service_name).await?;
    if current.len() > replicas {
        rollout.scale_down(current, replicas).await?;
    }

    // Phase 2: roll the oldest `replicas` survivors onto fresh containers.
    let mut to_update = running_containers(options, service_name).await?;
    sort_by_created(&mut to_update, false);
    to_update.truncate(replicas);

    let outcome = if to_update.is_empty() {
        RollingOutcome::default()
    } else {
        rollout.rolling_update(to_update).await?
    };

    // Phase 3: top up to the desired count.
    let updated = running_containers(options, service_name).await?;
    if updated.len() < replicas {
        rollout.scale_up(&updated, replicas).await?;
    }

    let final_containers = running_containers(options, service_name).await?;
    rename_to_convention(
        options.engine.as_ref(),
        final_containers.clone(),
        &options.project_name,
        service_name,
        &options.container_name_template,
    )
    .await?;

    let result = DeployOutcome {
        expected: replicas,
        actual: final_containers.len(),
        failures: outcome.failures,
    };
    info!(
        service = %service_name,
        expected = result.expected,
        actual = result.actual,
        failures = result.failures,
        "deployment complete"
    );

    Ok(result)
}

async fn running_containers(
    options: &DeployOptions,
    service_name: &str,
) -> DeployResult<Vec<ContainerSummary>> {
    service_containers(
        options.engine.as_ref(),
        &options.project_name,
        Some(service_name),
        Some("running"),
    )
    .await
    .map_err(DeployError::from)
}

/// Desired replicas, first non-zero wins: override, `deploy.replicas`,
/// `scale`, then 1.
pub fn resolve_replicas(service: &Service, replicas_override: Option<u32>) -> usize {
    replicas_override
        .filter(|r| *r > 0)
        .or_else(|| {
            service
                .deploy
                .as_ref()
                .and_then(|d| d.replicas)
                .filter(|r| *r > 0)
        })
        .or_else(|| service.scale.filter(|r| *r > 0))
        .unwrap_or(1) as usize
}

/// Resolve the update settings and hook scripts for a service. An absent
/// `update_config` gets the swarm-style defaults; a present one defaults
/// each field individually.
pub fn resolve_update_settings(service: &Service) -> DeployResult<(UpdateSettings, HookScripts)> {
    let config = service.deploy.as_ref().and_then(|d| d.update_config.as_ref());

    let Some(config) = config else {
        return Ok((
            UpdateSettings {
                parallelism: 1,
                delay: DEFAULT_DELAY,
                monitor: DEFAULT_MONITOR,
                max_failure_ratio: 0.0,
                failure_action: FailureAction::Pause,
                order: UpdateOrder::StartFirst,
            },
            HookScripts::default(),
        ));
    };

    let failure_action = match config.failure_action.as_deref() {
        None | Some("") => FailureAction::Continue,
        Some("pause") => FailureAction::Pause,
        Some(other) => {
            return Err(DeployError::Config(format!(
                "failure_action must be 'pause' (got: {other})"
            )))
        }
    };

    let order = match config.order.as_deref() {
        None | Some("") | Some("stop-first") => UpdateOrder::StopFirst,
        Some("start-first") => UpdateOrder::StartFirst,
        Some(other) => {
            return Err(DeployError::Config(format!(
                "order must be 'start-first' or 'stop-first' (got: {other})"
            )))
        }
    };

    let delay = parse_config_duration(config, |c| c.delay.as_deref())?.unwrap_or(Duration::ZERO);
    let monitor = parse_config_duration(config, |c| c.monitor.as_deref())?
        .filter(|m| !m.is_zero())
        .unwrap_or(DEFAULT_MONITOR);

    let settings = UpdateSettings {
        parallelism: config.parallelism.unwrap_or(1) as usize,
        delay,
        monitor,
        max_failure_ratio: config.max_failure_ratio.unwrap_or(0.0),
        failure_action,
        order,
    };

    let hooks = HookScripts {
        healthcheck: config.healthcheck_host_command.clone().unwrap_or_default(),
        pre_stop: config.pre_stop_host_command.clone().unwrap_or_default(),
        post_stop: config.post_stop_host_command.clone().unwrap_or_default(),
    };

    Ok((settings, hooks))
}

fn parse_config_duration(
    config: &UpdateConfig,
    pick: impl Fn(&UpdateConfig) -> Option<&str>,
) -> DeployResult<Option<Duration>> {
    pick(config)
        .map(|s| parse_duration(s).map_err(|e| DeployError::Config(e.to_string())))
        .transpose()
}

/// Skip policy, checked in order: model service, provider service, the
/// opt-out label, then known database images (only when requested).
pub fn should_skip_service(service: &Service, skip_databases: bool) -> bool {
    if service.is_model_service() {
        info!(service = %service.name, "skipping model service");
        return true;
    }
    if service.is_provider_service() {
        info!(service = %service.name, "skipping provider-managed service");
        return true;
    }
    if service.has_skip_label() {
        info!(service = %service.name, "skipping service with skip label");
        return true;
    }
    if skip_databases && is_database_service(service) {
        return true;
    }
    false
}

fn is_database_service(service: &Service) -> bool {
    let short = match image::short_name(&service.image) {
        Ok(short) => short,
        Err(err) => {
            error!(image = %service.image, error = %err, "error parsing image");
            return false;
        }
    };

    if image::is_known_database(&short) {
        info!(
            image = %short.trim_start_matches("library/"),
            "skipping detected database service"
        );
        return true;
    }

    false
}

/// Rename the surviving containers to the convention, oldest first with
/// a 1-based instance id. Containers already carrying the right name are
/// left alone, so a repeat run issues zero renames.
pub async fn rename_to_convention(
    engine: &dyn ContainerEngine,
    mut containers: Vec<ContainerSummary>,
    project_name: &str,
    service_name: &str,
    name_template: &str,
) -> DeployResult<()> {
    if containers.is_empty() {
        return Ok(());
    }

    let template =
        Template::parse(name_template).map_err(|e| DeployError::Template(e.to_string()))?;

    sort_by_created(&mut containers, false);

    for (index, container) in containers.iter().enumerate() {
        let instance_id = (index + 1).to_string();
        let new_name = template
            .render(&[
                ("ProjectName", project_name),
                ("ServiceName", service_name),
                ("InstanceID", instance_id.as_str()),
            ])
            .map_err(|e| DeployError::Template(e.to_string()))?;

        let current_name = container
            .names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or("");

        if current_name != new_name {
            engine.rename(&container.id, &new_name).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::manifest::{DeployConfig, ProviderConfig};

    fn service_with(deploy: Option<DeployConfig>, scale: Option<u32>) -> Service {
        Service {
            name: "web".into(),
            image: "myapp/web:latest".into(),
            scale,
            deploy,
            ..Service::default()
        }
    }

    fn deploy_with_replicas(replicas: Option<u32>) -> Option<DeployConfig> {
        Some(DeployConfig {
            replicas,
            update_config: None,
        })
    }

    #[test]
    fn replicas_override_wins() {
        let service = service_with(deploy_with_replicas(Some(3)), Some(5));
        assert_eq!(resolve_replicas(&service, Some(10)), 10);
    }

    #[test]
    fn replicas_fall_back_to_deploy_then_scale_then_one() {
        let service = service_with(deploy_with_replicas(Some(3)), Some(5));
        assert_eq!(resolve_replicas(&service, None), 3);

        let service = service_with(None, Some(5));
        assert_eq!(resolve_replicas(&service, None), 5);

        let service = service_with(None, None);
        assert_eq!(resolve_replicas(&service, None), 1);
    }

    #[test]
    fn zero_values_do_not_count() {
        let service = service_with(deploy_with_replicas(Some(0)), Some(5));
        assert_eq!(resolve_replicas(&service, Some(0)), 5);
    }

    #[test]
    fn absent_update_config_uses_swarm_defaults() {
        let service = service_with(None, None);
        let (settings, hooks) = resolve_update_settings(&service).unwrap();

        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.delay, Duration::from_secs(10));
        assert_eq!(settings.monitor, Duration::from_secs(5));
        assert_eq!(settings.max_failure_ratio, 0.0);
        assert_eq!(settings.failure_action, FailureAction::Pause);
        assert_eq!(settings.order, UpdateOrder::StartFirst);
        assert!(hooks.healthcheck.is_empty());
    }

    #[test]
    fn present_update_config_defaults_to_stop_first_and_no_delay() {
        let service = service_with(
            Some(DeployConfig {
                replicas: None,
                update_config: Some(UpdateConfig::default()),
            }),
            None,
        );
        let (settings, _) = resolve_update_settings(&service).unwrap();

        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.delay, Duration::ZERO);
        assert_eq!(settings.monitor, Duration::from_secs(5));
        assert_eq!(settings.failure_action, FailureAction::Continue);
        assert_eq!(settings.order, UpdateOrder::StopFirst);
    }

    #[test]
    fn update_config_fields_are_honored() {
        let service = service_with(
            Some(DeployConfig {
                replicas: None,
                update_config: Some(UpdateConfig {
                    parallelism: Some(2),
                    delay: Some("5s".into()),
                    monitor: Some("30s".into()),
                    max_failure_ratio: Some(0.25),
                    order: Some("start-first".into()),
                    failure_action: Some("pause".into()),
                    healthcheck_host_command: Some("curl -f localhost".into()),
                    pre_stop_host_command: Some("echo pre".into()),
                    post_stop_host_command: Some("echo post".into()),
                }),
            }),
            None,
        );
        let (settings, hooks) = resolve_update_settings(&service).unwrap();

        assert_eq!(settings.parallelism, 2);
        assert_eq!(settings.delay, Duration::from_secs(5));
        assert_eq!(settings.monitor, Duration::from_secs(30));
        assert_eq!(settings.max_failure_ratio, 0.25);
        assert_eq!(settings.order, UpdateOrder::StartFirst);
        assert_eq!(settings.failure_action, FailureAction::Pause);
        assert_eq!(hooks.healthcheck, "curl -f localhost");
        assert_eq!(hooks.pre_stop, "echo pre");
        assert_eq!(hooks.post_stop, "echo post");
    }

    #[test]
    fn unsupported_failure_action_is_rejected() {
        let service = service_with(
            Some(DeployConfig {
                replicas: None,
                update_config: Some(UpdateConfig {
                    failure_action: Some("rollback".into()),
                    ..UpdateConfig::default()
                }),
            }),
            None,
        );
        let err = resolve_update_settings(&service).unwrap_err();
        assert!(err.to_string().contains("failure_action must be 'pause'"));
    }

    #[test]
    fn zero_monitor_falls_back_to_default() {
        let service = service_with(
            Some(DeployConfig {
                replicas: None,
                update_config: Some(UpdateConfig {
                    monitor: Some("0s".into()),
                    ..UpdateConfig::default()
                }),
            }),
            None,
        );
        let (settings, _) = resolve_update_settings(&service).unwrap();
        assert_eq!(settings.monitor, Duration::from_secs(5));
    }

    #[test]
    fn database_images_are_detected() {
        for image in [
            "postgres:14",
            "library/postgres:14",
            "docker.io/library/postgres:14",
            "myregistry.com/library/postgres:latest",
            "mysql:8.0",
            "redis:7-alpine",
            "mariadb:10.11",
            "mongo:7",
            "clickhouse/clickhouse-server:latest",
            "elasticsearch:8.11.0",
            "rabbitmq:3-management",
            "getmeili/meilisearch:v1.5",
            "typesense/typesense:0.25",
            "dokku/docker-grafana-graphite:latest",
            "fanout/pushpin:latest",
            "omnisci/core-os-cpu:latest",
        ] {
            let service = Service {
                name: "svc".into(),
                image: image.into(),
                ..Service::default()
            };
            assert!(is_database_service(&service), "expected {image} to be a database");
        }

        for image in ["nginx:alpine", "node:20", "python:3.11", "myapp/web:latest"] {
            let service = Service {
                name: "svc".into(),
                image: image.into(),
                ..Service::default()
            };
            assert!(!is_database_service(&service), "expected {image} not to be a database");
        }
    }

    #[test]
    fn invalid_images_are_not_databases() {
        for image in ["invalid:image:tag:too:many:colons", ""] {
            let service = Service {
                name: "svc".into(),
                image: image.into(),
                ..Service::default()
            };
            assert!(!is_database_service(&service));
        }
    }

    #[test]
    fn skip_policy_checks_in_order() {
        let database = Service {
            name: "db".into(),
            image: "postgres:14".into(),
            ..Service::default()
        };
        assert!(should_skip_service(&database, true));
        assert!(!should_skip_service(&database, false));

        let labelled = Service {
            name: "web".into(),
            image: "myapp/web".into(),
            labels: std::collections::HashMap::from([(
                crate::manifest::SKIP_LABEL.to_string(),
                "true".to_string(),
            )]),
            ..Service::default()
        };
        assert!(should_skip_service(&labelled, false));

        let model = Service {
            name: "llm".into(),
            provider: Some(ProviderConfig {
                provider_type: "model".into(),
            }),
            ..Service::default()
        };
        assert!(should_skip_service(&model, false));

        let provider = Service {
            name: "managed".into(),
            provider: Some(ProviderConfig {
                provider_type: "awesomecloud".into(),
            }),
            ..Service::default()
        };
        assert!(should_skip_service(&provider, false));

        let plain = Service {
            name: "web".into(),
            image: "myapp/web".into(),
            ..Service::default()
        };
        assert!(!should_skip_service(&plain, true));
    }

    #[test]
    fn skip_label_must_match_exactly() {
        let almost = Service {
            name: "web".into(),
            image: "myapp/web".into(),
            labels: std::collections::HashMap::from([(
                crate::manifest::SKIP_LABEL.to_string(),
                "True".to_string(),
            )]),
            ..Service::default()
        };
        assert!(!should_skip_service(&almost, false));
    }

    fn named(id: &str, name: &str, created: i64) -> ContainerSummary {
        ContainerSummary {
            id: id.into(),
            names: vec![name.into()],
            created,
            ..ContainerSummary::default()
        }
    }

    const NAME_TEMPLATE: &str = "{{.ProjectName}}-{{.ServiceName}}-{{.InstanceID}}";

    #[tokio::test]
    async fn renames_by_creation_order() {
        let engine = MockEngine::new();
        let containers = vec![
            named("id1_container_id", "/old1", 100),
            named("id2_container_id", "/old2", 200),
        ];

        rename_to_convention(&engine, containers, "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap();

        assert_eq!(
            engine.renamed(),
            vec![
                ("id1_container_id".to_string(), "proj-web-1".to_string()),
                ("id2_container_id".to_string(), "proj-web-2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn correctly_named_containers_are_left_alone() {
        let engine = MockEngine::new();
        let containers = vec![
            named("id1_container_id", "/proj-web-1", 100),
            named("id2_container_id", "/proj-web-2", 200),
        ];

        rename_to_convention(&engine, containers, "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap();

        assert!(engine.renamed().is_empty());
    }

    #[tokio::test]
    async fn partially_named_sets_get_partial_renames() {
        let engine = MockEngine::new();
        let containers = vec![
            named("id1_container_id", "/proj-web-1", 100),
            named("id2_container_id", "/old2", 200),
        ];

        rename_to_convention(&engine, containers, "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap();

        assert_eq!(
            engine.renamed(),
            vec![("id2_container_id".to_string(), "proj-web-2".to_string())]
        );
    }

    #[tokio::test]
    async fn unnamed_containers_are_renamed() {
        let engine = MockEngine::new();
        let containers = vec![ContainerSummary {
            id: "id1_no_name".into(),
            created: 100,
            ..ContainerSummary::default()
        }];

        rename_to_convention(&engine, containers, "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap();

        assert_eq!(
            engine.renamed(),
            vec![("id1_no_name".to_string(), "proj-web-1".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_set_is_a_noop() {
        let engine = MockEngine::new();
        rename_to_convention(&engine, Vec::new(), "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap();
        assert!(engine.renamed().is_empty());
    }

    #[tokio::test]
    async fn invalid_template_errors() {
        let engine = MockEngine::new();
        let containers = vec![named("id1", "/old1", 100)];
        let err = rename_to_convention(&engine, containers, "proj", "web", "{{.Unclosed")
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Template(_)));
    }

    #[tokio::test]
    async fn rename_failure_propagates() {
        let engine = MockEngine::new().with_rename(|_, _| {
            Err(crate::engine::EngineError::Rename("rename failed".into()))
        });
        let containers = vec![named("id1", "/old1", 100)];
        let err = rename_to_convention(&engine, containers, "proj", "web", NAME_TEMPLATE)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rename failed"));
    }
}
