use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BackendError, open_log_file};
use crate::config::ConfigSnapshot;
use crate::env::build_service_env;
use crate::plan::ServiceSpec;
use crate::process::{Fingerprint, read_fingerprint};
use crate::registry::RecordHandle;

/// Spawn a local process in its own process group, output appended to its log file.
///
/// The child is not killed when the handle drops: a detached `up` leaves it
/// running for a later `down`, which finds it through the registry.
pub(super) async fn spawn_process(
    spec: &ServiceSpec,
    command: &[String],
    working_dir: Option<&Path>,
    environment: &BTreeMap<String, String>,
    snapshot: &ConfigSnapshot,
) -> Result<RecordHandle, BackendError> {
    let Some((program, args)) = command.split_first() else {
        return Err(BackendError::Config {
            service: spec.name.clone(),
            message: "empty command".to_string(),
        });
    };

    let cwd = working_dir
        .map(|d| snapshot.resolve_path(d))
        .unwrap_or_else(|| snapshot.base_dir().to_path_buf());
    if !cwd.is_dir() {
        return Err(BackendError::Config {
            service: spec.name.clone(),
            message: format!("working directory '{}' does not exist", cwd.display()),
        });
    }

    let (log, log_path) = open_log_file(snapshot, &spec.name)?;
    let log_err = log.try_clone()?;

    info!("Starting service {}: {} {:?}", spec.name, program, args);
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&cwd)
        .env_clear()
        .envs(build_service_env(snapshot, environment))
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(false);

    // A new process group so shutdown reaches every descendant
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| BackendError::Spawn {
        service: spec.name.clone(),
        program: program.clone(),
        source: e,
    })?;

    let Some(pid) = child.id() else {
        return Err(BackendError::Config {
            service: spec.name.clone(),
            message: "process exited before its PID could be read".to_string(),
        });
    };

    let fingerprint = read_fingerprint(pid).unwrap_or_else(|| {
        warn!("Could not read fingerprint of PID {}; recording launch argv", pid);
        Fingerprint {
            argv: command.to_vec(),
            start_time: chrono::Utc::now().timestamp().max(0) as u64,
        }
    });
    debug!(
        "Service {} spawned with PID {} (log: {})",
        spec.name,
        pid,
        log_path.display()
    );

    // Reap the child so its exit is observable; it never becomes a zombie
    let service = spec.name.clone();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!("Service {} (PID {}) exited with {}", service, pid, status),
            Err(e) => warn!("Error waiting for service {} (PID {}): {}", service, pid, e),
        }
    });

    Ok(RecordHandle::Process { pid, fingerprint })
}
