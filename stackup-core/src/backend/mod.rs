//! Service backends
//!
//! This module provides:
//! - `ServiceBackend` - start / probe / stop capability, one implementation per launch kind
//! - `DefaultBackend` - dispatches on the service's `StartSpec`
//! - `BackendError` - launch and stop failures
//!
//! The scheduler only sees the trait, so tests swap in a scripted backend.

mod compose;
mod process;
mod script;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::{ConfigSnapshot, StartSpec};
use crate::env::build_service_env;
use crate::health::{ProbeFailure, ProbeResult, run_probe};
use crate::plan::ServiceSpec;
use crate::process::process_alive;
use crate::registry::{ComposeRecord, ProcessRecord, RecordHandle};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to spawn '{program}' for service {service}: {source}")]
    Spawn {
        service: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' for service {service} failed ({status}): {stderr}")]
    Command {
        service: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Command '{command}' for service {service} did not finish within {timeout:?}")]
    CommandTimeout {
        service: String,
        command: String,
        timeout: Duration,
    },

    #[error("Service {service}: {message}")]
    Config { service: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Launch a service. The returned handle is what the registry records.
    async fn start(
        &self,
        spec: &ServiceSpec,
        snapshot: &ConfigSnapshot,
    ) -> Result<RecordHandle, BackendError>;

    /// One health probe attempt against a launched service.
    async fn probe(
        &self,
        spec: &ServiceSpec,
        handle: &RecordHandle,
        snapshot: &ConfigSnapshot,
    ) -> ProbeResult;

    /// Stop a backend-managed record. Process records are stopped by PID, not here.
    async fn stop(&self, record: &ProcessRecord, snapshot: &ConfigSnapshot)
    -> Result<(), BackendError>;

    /// Tear down the compose project a run brought up.
    async fn teardown(
        &self,
        compose: &ComposeRecord,
        snapshot: &ConfigSnapshot,
    ) -> Result<(), BackendError>;
}

/// The real backend: local processes, compose services and start/stop scripts.
#[derive(Debug, Clone, Default)]
pub struct DefaultBackend;

#[async_trait]
impl ServiceBackend for DefaultBackend {
    async fn start(
        &self,
        spec: &ServiceSpec,
        snapshot: &ConfigSnapshot,
    ) -> Result<RecordHandle, BackendError> {
        match &spec.start {
            StartSpec::Process {
                command,
                working_dir,
                environment,
            } => {
                process::spawn_process(spec, command, working_dir.as_deref(), environment, snapshot)
                    .await
            }
            StartSpec::Compose { service } => {
                compose::compose_up(spec, service.as_deref(), snapshot).await
            }
            StartSpec::Script { run, .. } => script::run_start(spec, run, snapshot).await,
        }
    }

    async fn probe(
        &self,
        spec: &ServiceSpec,
        handle: &RecordHandle,
        snapshot: &ConfigSnapshot,
    ) -> ProbeResult {
        if let RecordHandle::Process { pid, .. } = handle {
            if !process_alive(*pid) {
                return Err(ProbeFailure::fatal(format!("process {} exited", pid)));
            }
        }

        match (&spec.probe, &spec.start) {
            (Some(probe), _) => run_probe(probe, spec.probe_timeout, snapshot).await,
            (None, StartSpec::Process { .. }) => Ok("process running".to_string()),
            (None, StartSpec::Compose { .. }) => compose::compose_running(spec, handle).await,
            (None, StartSpec::Script { .. }) => Ok("start command succeeded".to_string()),
        }
    }

    async fn stop(
        &self,
        record: &ProcessRecord,
        snapshot: &ConfigSnapshot,
    ) -> Result<(), BackendError> {
        let RecordHandle::Managed { start, .. } = &record.handle else {
            return Err(BackendError::Config {
                service: record.service.clone(),
                message: "process records are stopped by PID".to_string(),
            });
        };
        match start {
            StartSpec::Compose { service } => {
                compose::compose_stop(record, service.as_deref(), snapshot).await
            }
            StartSpec::Script { stop: Some(stop), .. } => {
                script::run_stop(record, stop, snapshot).await
            }
            StartSpec::Script { stop: None, .. } => {
                debug!("Service {} has no stop command", record.service);
                Ok(())
            }
            StartSpec::Process { .. } => Err(BackendError::Config {
                service: record.service.clone(),
                message: "process launches are never backend-managed".to_string(),
            }),
        }
    }

    async fn teardown(
        &self,
        compose: &ComposeRecord,
        snapshot: &ConfigSnapshot,
    ) -> Result<(), BackendError> {
        compose::compose_down(compose, snapshot).await
    }
}

/// Run a short-lived helper command to completion, capturing its output.
pub(crate) async fn run_command(
    service: &str,
    argv: &[String],
    cwd: &Path,
    snapshot: &ConfigSnapshot,
    limit: Duration,
) -> Result<Output, BackendError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(BackendError::Config {
            service: service.to_string(),
            message: "empty command".to_string(),
        });
    };

    debug!("Running {:?} for {}", argv, service);
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(build_service_env(snapshot, &Default::default()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| BackendError::Spawn {
            service: service.to_string(),
            program: program.clone(),
            source: e,
        })?,
        Err(_) => {
            return Err(BackendError::CommandTimeout {
                service: service.to_string(),
                command: argv.join(" "),
                timeout: limit,
            });
        }
    };

    if !output.status.success() {
        return Err(BackendError::Command {
            service: service.to_string(),
            command: argv.join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Open (append) `<logs_dir>/<service>.log`.
pub(crate) fn open_log_file(snapshot: &ConfigSnapshot, service: &str) -> std::io::Result<(std::fs::File, PathBuf)> {
    let dir = snapshot.logs_dir();
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.log", service));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    Ok((file, path))
}
