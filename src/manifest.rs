//! Compose manifest loading and the resolved project model.
//!
//! The deployer consumes a read-only [`Project`]: an ordered set of
//! services plus their dependency edges. Loading handles the single
//! compose file the tool operates on, with profiles applied; the engine
//! remains the source of truth for runtime state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Service label that opts a service out of deployment.
pub const SKIP_LABEL: &str = "com.dokku.orchestrate/skip";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("no compose file found")]
    NoComposeFile,

    #[error("error reading {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("error parsing compose file: {0}")]
    Parse(String),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("service {0} not found in compose file")]
    UnknownService(String),

    #[error("dependency cycle involving service {0}")]
    DependencyCycle(String),
}

/// A resolved, read-only compose project.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub services: Vec<Service>,
}

impl Project {
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Service names in dependency order: every service appears after
    /// all of its dependencies. Deterministic for a given project.
    pub fn dependency_order(&self) -> Result<Vec<String>, ManifestError> {
        let mut remaining: BTreeMap<&str, Vec<&str>> = self
            .services
            .iter()
            .map(|s| {
                (
                    s.name.as_str(),
                    s.depends_on.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        for service in &self.services {
            for dep in &service.depends_on {
                if !remaining.contains_key(dep.as_str()) {
                    return Err(ManifestError::UnknownService(dep.clone()));
                }
            }
        }

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.iter().all(|d| !remaining.contains_key(d)))
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                let stuck = remaining.keys().next().unwrap().to_string();
                return Err(ManifestError::DependencyCycle(stuck));
            }

            for name in ready {
                remaining.remove(name);
                order.push(name.to_string());
            }
        }

        Ok(order)
    }
}

/// One service from the manifest.
#[derive(Debug, Clone, Default)]
pub struct Service {
    pub name: String,
    pub image: String,
    pub scale: Option<u32>,
    pub labels: HashMap<String, String>,
    pub depends_on: Vec<String>,
    pub profiles: Vec<String>,
    pub deploy: Option<DeployConfig>,
    pub provider: Option<ProviderConfig>,
}

impl Service {
    /// Services backed by an AI model provider are never deployed here.
    pub fn is_model_service(&self) -> bool {
        self.provider
            .as_ref()
            .is_some_and(|p| p.provider_type == "model")
    }

    /// Provider-managed services are run by their provider, not compose.
    pub fn is_provider_service(&self) -> bool {
        self.provider.is_some()
    }

    /// Exact-match opt-out label.
    pub fn has_skip_label(&self) -> bool {
        self.labels.get(SKIP_LABEL).map(String::as_str) == Some("true")
    }
}

/// `deploy:` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub replicas: Option<u32>,
    pub update_config: Option<UpdateConfig>,
}

/// `deploy.update_config:` section, including the host-command
/// extension fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub parallelism: Option<u64>,
    pub delay: Option<String>,
    pub monitor: Option<String>,
    pub max_failure_ratio: Option<f64>,
    pub order: Option<String>,
    pub failure_action: Option<String>,
    #[serde(rename = "x-healthcheck-host-command")]
    pub healthcheck_host_command: Option<String>,
    #[serde(rename = "x-pre-stop-host-command")]
    pub pre_stop_host_command: Option<String>,
    #[serde(rename = "x-post-stop-host-command")]
    pub post_stop_host_command: Option<String>,
}

/// `provider:` section (externally-managed services).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
}

#[derive(Debug, Deserialize)]
struct ComposeDocument {
    #[serde(default)]
    services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    image: Option<String>,
    scale: Option<u32>,
    labels: RawLabels,
    depends_on: RawDependsOn,
    profiles: Vec<String>,
    deploy: Option<DeployConfig>,
    provider: Option<ProviderConfig>,
}

/// Compose accepts labels as a map or as a `key=value` list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabels {
    Map(BTreeMap<String, RawLabelValue>),
    List(Vec<String>),
}

impl Default for RawLabels {
    fn default() -> Self {
        RawLabels::List(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLabelValue {
    String(String),
    Bool(bool),
    Number(serde_yaml::Number),
}

impl RawLabelValue {
    fn into_string(self) -> String {
        match self {
            RawLabelValue::String(s) => s,
            RawLabelValue::Bool(b) => b.to_string(),
            RawLabelValue::Number(n) => n.to_string(),
        }
    }
}

impl RawLabels {
    fn normalise(self) -> HashMap<String, String> {
        match self {
            RawLabels::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, v.into_string()))
                .collect(),
            RawLabels::List(items) => items
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
        }
    }
}

/// Compose accepts `depends_on` as a list or as a map with conditions.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl Default for RawDependsOn {
    fn default() -> Self {
        RawDependsOn::List(Vec::new())
    }
}

impl RawDependsOn {
    fn normalise(self) -> Vec<String> {
        match self {
            RawDependsOn::List(names) => names,
            RawDependsOn::Map(map) => map.into_keys().collect(),
        }
    }
}

/// Find the compose file in `dir`: `docker-compose.yaml` is preferred
/// over `docker-compose.yml`.
pub fn find_compose_file(dir: &Path) -> Result<PathBuf, ManifestError> {
    for candidate in ["docker-compose.yaml", "docker-compose.yml"] {
        let path = dir.join(candidate);
        if path.is_file() {
            return path.canonicalize().map_err(|e| ManifestError::Io {
                path,
                message: e.to_string(),
            });
        }
    }
    Err(ManifestError::NoComposeFile)
}

/// Load and resolve the project from a compose file, keeping only the
/// services active under the requested profiles.
pub fn load_project(
    path: &Path,
    project_name: &str,
    profiles: &[String],
) -> Result<Project, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let document: ComposeDocument =
        serde_yaml::from_str(&text).map_err(|e| ManifestError::Parse(e.to_string()))?;

    let services = document
        .services
        .into_iter()
        .filter(|(_, raw)| profile_active(&raw.profiles, profiles))
        .map(|(name, raw)| Service {
            name,
            image: raw.image.unwrap_or_default(),
            scale: raw.scale,
            labels: raw.labels.normalise(),
            depends_on: raw.depends_on.normalise(),
            profiles: raw.profiles,
            deploy: raw.deploy,
            provider: raw.provider,
        })
        .collect();

    Ok(Project {
        name: project_name.to_string(),
        services,
    })
}

fn profile_active(declared: &[String], requested: &[String]) -> bool {
    declared.is_empty() || declared.iter().any(|p| requested.contains(p))
}

/// Parse a compose duration string (`10s`, `1m30s`, `500ms`, `1.5s`).
pub fn parse_duration(source: &str) -> Result<Duration, ManifestError> {
    let invalid = || ManifestError::Duration(source.to_string());

    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;

        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return Err(invalid()),
        };
        total += Duration::from_nanos((value * nanos_per_unit) as u64);
        rest = &rest[unit_len..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn prefers_yaml_over_yml() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "docker-compose.yaml", "services: {}\n");
        write_file(dir.path(), "docker-compose.yml", "services: {}\n");

        let found = find_compose_file(dir.path()).unwrap();
        assert!(found.to_string_lossy().ends_with("docker-compose.yaml"));
    }

    #[test]
    fn falls_back_to_yml() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "docker-compose.yml", "services: {}\n");

        let found = find_compose_file(dir.path()).unwrap();
        assert!(found.to_string_lossy().ends_with("docker-compose.yml"));
    }

    #[test]
    fn errors_without_a_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_compose_file(dir.path()),
            Err(ManifestError::NoComposeFile)
        ));
    }

    #[test]
    fn loads_services_with_update_config() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "docker-compose.yaml",
            r#"
services:
  web:
    image: myapp/web:latest
    deploy:
      replicas: 3
      update_config:
        parallelism: 2
        delay: 5s
        monitor: 10s
        max_failure_ratio: 0.25
        order: start-first
        failure_action: pause
        x-healthcheck-host-command: "curl -f http://{{.ContainerIP}}:8080/health"
  db:
    image: postgres:14
    labels:
      com.dokku.orchestrate/skip: "true"
"#,
        );

        let project =
            load_project(&dir.path().join("docker-compose.yaml"), "proj", &[]).unwrap();
        assert_eq!(project.name, "proj");
        assert_eq!(project.services.len(), 2);

        let web = project.service("web").unwrap();
        let deploy = web.deploy.as_ref().unwrap();
        assert_eq!(deploy.replicas, Some(3));
        let update = deploy.update_config.as_ref().unwrap();
        assert_eq!(update.parallelism, Some(2));
        assert_eq!(update.delay.as_deref(), Some("5s"));
        assert_eq!(update.max_failure_ratio, Some(0.25));
        assert_eq!(update.order.as_deref(), Some("start-first"));
        assert!(update
            .healthcheck_host_command
            .as_deref()
            .unwrap()
            .contains("{{.ContainerIP}}"));

        let db = project.service("db").unwrap();
        assert!(db.has_skip_label());
    }

    #[test]
    fn accepts_both_label_and_depends_on_forms() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "docker-compose.yaml",
            r#"
services:
  web:
    image: myapp/web
    labels:
      - com.dokku.orchestrate/skip=true
    depends_on:
      db:
        condition: service_started
  db:
    image: postgres:14
    labels:
      team: backend
    depends_on:
      - cache
  cache:
    image: redis:7
"#,
        );

        let project =
            load_project(&dir.path().join("docker-compose.yaml"), "proj", &[]).unwrap();

        let web = project.service("web").unwrap();
        assert!(web.has_skip_label());
        assert_eq!(web.depends_on, vec!["db".to_string()]);

        let db = project.service("db").unwrap();
        assert_eq!(db.labels.get("team").map(String::as_str), Some("backend"));
        assert_eq!(db.depends_on, vec!["cache".to_string()]);
    }

    #[test]
    fn unquoted_yaml_bool_label_still_matches_skip() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "docker-compose.yaml",
            r#"
services:
  web:
    image: myapp/web
    labels:
      com.dokku.orchestrate/skip: true
"#,
        );

        let project =
            load_project(&dir.path().join("docker-compose.yaml"), "proj", &[]).unwrap();
        assert!(project.service("web").unwrap().has_skip_label());
    }

    #[test]
    fn profiles_filter_services() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "docker-compose.yaml",
            r#"
services:
  web:
    image: myapp/web
  debug:
    image: myapp/debug
    profiles: ["debug"]
"#,
        );

        let path = dir.path().join("docker-compose.yaml");
        let without = load_project(&path, "proj", &[]).unwrap();
        assert!(without.service("debug").is_none());

        let with = load_project(&path, "proj", &["debug".to_string()]).unwrap();
        assert!(with.service("debug").is_some());
    }

    #[test]
    fn provider_services_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "docker-compose.yaml",
            r#"
services:
  llm:
    provider:
      type: model
  managed:
    provider:
      type: awesomecloud
  web:
    image: myapp/web
"#,
        );

        let project =
            load_project(&dir.path().join("docker-compose.yaml"), "proj", &[]).unwrap();
        assert!(project.service("llm").unwrap().is_model_service());
        assert!(project.service("managed").unwrap().is_provider_service());
        assert!(!project.service("managed").unwrap().is_model_service());
        assert!(!project.service("web").unwrap().is_provider_service());
    }

    #[test]
    fn dependency_order_puts_dependencies_first() {
        let project = Project {
            name: "proj".into(),
            services: vec![
                Service {
                    name: "web".into(),
                    depends_on: vec!["api".into()],
                    ..Service::default()
                },
                Service {
                    name: "api".into(),
                    depends_on: vec!["db".into()],
                    ..Service::default()
                },
                Service {
                    name: "db".into(),
                    ..Service::default()
                },
            ],
        };

        let order = project.dependency_order().unwrap();
        let web_pos = order.iter().position(|n| n == "web").unwrap();
        let api_pos = order.iter().position(|n| n == "api").unwrap();
        let db_pos = order.iter().position(|n| n == "db").unwrap();
        assert!(db_pos < api_pos);
        assert!(api_pos < web_pos);
    }

    #[test]
    fn dependency_cycle_is_an_error() {
        let project = Project {
            name: "proj".into(),
            services: vec![
                Service {
                    name: "a".into(),
                    depends_on: vec!["b".into()],
                    ..Service::default()
                },
                Service {
                    name: "b".into(),
                    depends_on: vec!["a".into()],
                    ..Service::default()
                },
            ],
        };
        assert!(matches!(
            project.dependency_order(),
            Err(ManifestError::DependencyCycle(_))
        ));
    }

    #[test]
    fn parses_compose_durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10 parsecs").is_err());
    }
}
