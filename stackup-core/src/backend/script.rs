use std::time::Duration;
use tracing::info;

use super::{BackendError, run_command};
use crate::config::ConfigSnapshot;
use crate::plan::ServiceSpec;
use crate::registry::{ProcessRecord, RecordHandle};

fn shell(snippet: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), snippet.to_string()]
}

/// Run the start snippet to completion. It is expected to hand the service off
/// to something else (a container runtime, a service manager) and return.
pub(super) async fn run_start(
    spec: &ServiceSpec,
    run: &str,
    snapshot: &ConfigSnapshot,
) -> Result<RecordHandle, BackendError> {
    info!("Starting service {} via script", spec.name);
    run_command(&spec.name, &shell(run), snapshot.base_dir(), snapshot, spec.timeout).await?;
    Ok(RecordHandle::Managed {
        label: format!("script:{}", spec.name),
        start: spec.start.clone(),
    })
}

pub(super) async fn run_stop(
    record: &ProcessRecord,
    stop: &str,
    snapshot: &ConfigSnapshot,
) -> Result<(), BackendError> {
    info!("Stopping service {} via script", record.service);
    let limit = record.stop.grace_period + Duration::from_secs(30);
    run_command(&record.service, &shell(stop), snapshot.base_dir(), snapshot, limit).await?;
    Ok(())
}
