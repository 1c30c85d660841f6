use std::time::Duration;
use tracing::info;

use super::{BackendError, run_command};
use crate::config::{ComposeConfig, ConfigSnapshot};
use crate::health::{ProbeFailure, ProbeResult};
use crate::plan::ServiceSpec;
use crate::registry::{ComposeRecord, ProcessRecord, RecordHandle};

const PS_TIMEOUT: Duration = Duration::from_secs(10);

fn compose_config<'a>(
    snapshot: &'a ConfigSnapshot,
    service: &str,
) -> Result<&'a ComposeConfig, BackendError> {
    snapshot
        .stack
        .compose
        .as_ref()
        .ok_or_else(|| BackendError::Config {
            service: service.to_string(),
            message: "compose service declared but the stack has no 'compose' section".to_string(),
        })
}

/// `docker compose -p <project> -f <file>` followed by `args`.
fn compose_argv(project: &str, file: &str, args: &[&str]) -> Vec<String> {
    let mut argv: Vec<String> = ["docker", "compose", "-p", project, "-f", file]
        .iter()
        .map(|s| s.to_string())
        .collect();
    argv.extend(args.iter().map(|s| s.to_string()));
    argv
}

pub(super) async fn compose_up(
    spec: &ServiceSpec,
    compose_service: Option<&str>,
    snapshot: &ConfigSnapshot,
) -> Result<RecordHandle, BackendError> {
    let compose = compose_config(snapshot, &spec.name)?;
    let target = compose_service.unwrap_or(&spec.name);
    let file = snapshot.resolve_path(&compose.file);

    info!("Starting compose service {} ({}/{})", spec.name, compose.project, target);
    let argv = compose_argv(
        &compose.project,
        &file.to_string_lossy(),
        &["up", "-d", "--no-deps", target],
    );
    run_command(&spec.name, &argv, snapshot.base_dir(), snapshot, spec.timeout).await?;

    Ok(RecordHandle::Managed {
        label: format!("compose:{}/{}", compose.project, target),
        start: spec.start.clone(),
    })
}

/// Readiness without an explicit probe: the container is running.
pub(super) async fn compose_running(spec: &ServiceSpec, handle: &RecordHandle) -> ProbeResult {
    let RecordHandle::Managed { label, .. } = handle else {
        return Err(ProbeFailure::fatal("compose service without a managed handle"));
    };
    let Some((project, target)) = label
        .strip_prefix("compose:")
        .and_then(|rest| rest.split_once('/'))
    else {
        return Err(ProbeFailure::fatal(format!("malformed compose handle '{}'", label)));
    };

    let argv: Vec<String> = [
        "docker", "compose", "-p", project, "ps", "--status", "running", "-q", target,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    let output = match tokio::time::timeout(PS_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ProbeFailure::transient(format!("docker compose ps failed: {}", e))),
        Err(_) => return Err(ProbeFailure::transient("docker compose ps timed out")),
    };

    if output.status.success() && !String::from_utf8_lossy(&output.stdout).trim().is_empty() {
        Ok(format!("{} container running", spec.name))
    } else {
        Err(ProbeFailure::transient(format!("{} container is not running", target)))
    }
}

pub(super) async fn compose_stop(
    record: &ProcessRecord,
    compose_service: Option<&str>,
    snapshot: &ConfigSnapshot,
) -> Result<(), BackendError> {
    let compose = compose_config(snapshot, &record.service)?;
    let target = compose_service.unwrap_or(&record.service);
    let file = snapshot.resolve_path(&compose.file);
    let grace = record.stop.grace_period.as_secs().max(1).to_string();

    info!("Stopping compose service {} ({}/{})", record.service, compose.project, target);
    let argv = compose_argv(
        &compose.project,
        &file.to_string_lossy(),
        &["stop", "-t", &grace, target],
    );
    let limit = record.stop.grace_period + Duration::from_secs(30);
    run_command(&record.service, &argv, snapshot.base_dir(), snapshot, limit).await?;
    Ok(())
}

pub(super) async fn compose_down(
    compose: &ComposeRecord,
    snapshot: &ConfigSnapshot,
) -> Result<(), BackendError> {
    info!("Tearing down compose project {}", compose.project);
    let argv = compose_argv(&compose.project, &compose.file.to_string_lossy(), &["down"]);
    run_command(
        &compose.project,
        &argv,
        snapshot.base_dir(),
        snapshot,
        Duration::from_secs(120),
    )
    .await?;
    Ok(())
}
