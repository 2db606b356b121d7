//! Host-side lifecycle scripts.
//!
//! Services can declare `x-healthcheck-host-command`,
//! `x-pre-stop-host-command`, and `x-post-stop-host-command` under
//! `deploy.update_config`. Each is a template rendered per container and
//! executed on the host as a transient script. The runner is oblivious
//! to hook semantics; the kind is only a label for log and error text.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::{ContainerDetail, ContainerEngine};
use crate::error::{DeployError, DeployResult};
use crate::exec::{CommandExecutor, ExecError, ExecRequest};
use crate::template::Template;

/// Which lifecycle point a script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Healthcheck,
    PreStop,
    PostStop,
}

impl HookKind {
    pub fn label(&self) -> &'static str {
        match self {
            HookKind::Healthcheck => "healthcheck",
            HookKind::PreStop => "pre-stop",
            HookKind::PostStop => "post-stop",
        }
    }
}

/// Host-script sources for one service. Empty string means "not set".
#[derive(Debug, Clone, Default)]
pub struct HookScripts {
    pub healthcheck: String,
    pub pre_stop: String,
    pub post_stop: String,
}

/// Run one host-side script for a container. A no-op when `source` is
/// empty. On process failure the returned error carries the combined
/// captured output; the transient script file is removed either way.
pub async fn run_hook(
    engine: &dyn ContainerEngine,
    executor: &dyn CommandExecutor,
    container_id: &str,
    service_name: &str,
    source: &str,
    kind: HookKind,
    cancel: &CancellationToken,
) -> DeployResult<()> {
    if source.is_empty() {
        return Ok(());
    }

    let template = Template::parse(source).map_err(|e| DeployError::Template(e.to_string()))?;

    let detail = engine.inspect(container_id).await?;
    let container_ip = resolve_container_ip(&detail);
    let short_id = &container_id[..container_id.len().min(12)];

    let mut script = template
        .render(&[
            ("ContainerID", container_id),
            ("ContainerShortID", short_id),
            ("ContainerIP", container_ip.as_str()),
            ("ServiceName", service_name),
        ])
        .map_err(|e| DeployError::Template(e.to_string()))?;

    if !script.starts_with("#!") {
        script = format!("#!/usr/bin/env bash\n{script}");
    }

    // The NamedTempFile guard removes the script on every exit path.
    let file = write_script(kind, &script).map_err(|e| {
        DeployError::Command {
            context: format!("error materialising {} script: {e}", kind.label()),
            output: String::new(),
        }
    })?;

    let request = ExecRequest::new(file.path().to_string_lossy().into_owned(), Vec::new())
        .in_dir(std::env::temp_dir());

    match executor.run(request, cancel).await {
        Ok(_) => Ok(()),
        Err(ExecError::Cancelled) => Err(DeployError::Cancelled),
        Err(err) => {
            let output = match &err {
                ExecError::NonZeroExit { output, .. } => output.combined_trimmed(),
                _ => String::new(),
            };
            Err(DeployError::Command {
                context: format!(
                    "{} command failed for container {short_id}: {err}",
                    kind.label()
                ),
                output,
            })
        }
    }
}

/// Run a pre/post-stop hook, swallowing failures. Stop hooks are
/// best-effort around terminations; a broken script must not wedge the
/// rollout.
pub async fn run_stop_hook_logged(
    engine: &dyn ContainerEngine,
    executor: &dyn CommandExecutor,
    container_id: &str,
    service_name: &str,
    source: &str,
    kind: HookKind,
    cancel: &CancellationToken,
) {
    if let Err(err) = run_hook(
        engine,
        executor,
        container_id,
        service_name,
        source,
        kind,
        cancel,
    )
    .await
    {
        warn!(
            container = %&container_id[..container_id.len().min(12)],
            hook = kind.label(),
            error = %err,
            "lifecycle hook failed"
        );
    }
}

fn resolve_container_ip(detail: &ContainerDetail) -> String {
    if detail.network_mode == "host" {
        return "127.0.0.1".to_string();
    }
    detail
        .networks
        .get(&detail.network_mode)
        .cloned()
        .unwrap_or_default()
}

fn write_script(kind: HookKind, contents: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("{}-", kind.label()))
        .suffix(".script")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;

    let mut perms = file.as_file().metadata()?.permissions();
    perms.set_mode(0o755);
    file.as_file().set_permissions(perms)?;

    Ok(file)
}
