//! Shutdown coordinator: stop what the registry says we started, nothing else.
//!
//! This module provides:
//! - `ShutdownCoordinator::stop_service` - stop one record (used for rollback and port reclaim)
//! - `ShutdownCoordinator::shutdown` - stage-reverse stop of every record, then compose teardown
//! - `ShutdownReport` - per-service outcomes; failures are reported here, never raised
//!
//! A record is removed only after the exit was observed (or the PID was shown to
//! belong to something else). Running shutdown against an empty registry does
//! not touch the registry file.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::ServiceBackend;
use crate::config::ConfigSnapshot;
use crate::errors::Result;
use crate::process::{Liveness, TerminateOutcome, terminate, verify_fingerprint};
use crate::registry::{PidRegistry, RecordHandle};

/// How stopping one service ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// No record for this service.
    NotTracked,
    /// The tracked process had already exited.
    AlreadyGone,
    /// The PID now belongs to another process; it was left alone.
    PidReused { pid: u32 },
    Graceful,
    Killed,
    /// Still alive after SIGKILL; the record is kept.
    Survived { pid: u32 },
    BackendStopped,
    /// The backend's stop failed; the record is kept.
    BackendFailed { message: String },
}

impl StopOutcome {
    /// Whether the service is confirmed not running (the record was removed).
    pub fn is_stopped(&self) -> bool {
        !matches!(
            self,
            StopOutcome::Survived { .. } | StopOutcome::BackendFailed { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            StopOutcome::NotTracked => "not tracked".to_string(),
            StopOutcome::AlreadyGone => "already gone".to_string(),
            StopOutcome::PidReused { pid } => format!("pid {} reused, left running", pid),
            StopOutcome::Graceful => "stopped".to_string(),
            StopOutcome::Killed => "killed after grace period".to_string(),
            StopOutcome::Survived { pid } => format!("pid {} survived SIGKILL", pid),
            StopOutcome::BackendStopped => "stopped".to_string(),
            StopOutcome::BackendFailed { message } => format!("stop failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStop {
    pub service: String,
    #[serde(flatten)]
    pub outcome: StopOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeTeardown {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub services: Vec<ServiceStop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeTeardown>,
    /// Whether the registry file was rewritten.
    pub registry_written: bool,
}

impl ShutdownReport {
    pub fn is_complete(&self) -> bool {
        self.services.iter().all(|s| s.outcome.is_stopped())
            && self.compose.as_ref().is_none_or(|c| c.error.is_none())
    }

    /// Services that could not be confirmed stopped.
    pub fn incomplete(&self) -> Vec<&ServiceStop> {
        self.services
            .iter()
            .filter(|s| !s.outcome.is_stopped())
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.services.is_empty() && self.compose.is_none() && !self.registry_written
    }
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    backend: Arc<dyn ServiceBackend>,
    snapshot: Arc<ConfigSnapshot>,
}

impl ShutdownCoordinator {
    pub fn new(backend: Arc<dyn ServiceBackend>, snapshot: Arc<ConfigSnapshot>) -> Self {
        Self { backend, snapshot }
    }

    /// Stop the service recorded under `service`, removing its record once the
    /// stop is confirmed. Does not persist the registry.
    pub async fn stop_service(&self, registry: &mut PidRegistry, service: &str) -> StopOutcome {
        let Some(record) = registry.get(service).cloned() else {
            return StopOutcome::NotTracked;
        };

        let outcome = match &record.handle {
            RecordHandle::Process { pid, fingerprint } => {
                match verify_fingerprint(*pid, fingerprint) {
                    Liveness::Gone => StopOutcome::AlreadyGone,
                    Liveness::Reused => {
                        warn!(
                            "PID {} of service {} now belongs to another process; not signalling it",
                            pid, service
                        );
                        StopOutcome::PidReused { pid: *pid }
                    }
                    Liveness::Alive => {
                        match terminate(*pid, &record.stop.signal, record.stop.grace_period).await
                        {
                            TerminateOutcome::AlreadyGone => StopOutcome::AlreadyGone,
                            TerminateOutcome::Graceful => StopOutcome::Graceful,
                            TerminateOutcome::Killed => StopOutcome::Killed,
                            TerminateOutcome::Survived => StopOutcome::Survived { pid: *pid },
                        }
                    }
                }
            }
            RecordHandle::Managed { .. } => {
                match self.backend.stop(&record, &self.snapshot).await {
                    Ok(()) => StopOutcome::BackendStopped,
                    Err(e) => StopOutcome::BackendFailed {
                        message: e.to_string(),
                    },
                }
            }
        };

        if outcome.is_stopped() {
            registry.remove(service);
            info!("Service {}: {}", service, outcome.describe());
        } else {
            error!("Service {}: {}", service, outcome.describe());
        }
        outcome
    }

    /// Stop every recorded service in stage-reverse order, tear down the compose
    /// project last and persist the registry if anything changed.
    ///
    /// Only registry I/O errors are returned; stop failures land in the report.
    pub async fn shutdown(&self, registry: &mut PidRegistry) -> Result<ShutdownReport> {
        let mut report = ShutdownReport::default();
        let order = registry.shutdown_order();
        if !order.is_empty() {
            info!("Stopping {} service(s): {}", order.len(), order.join(", "));
        }

        for service in order {
            let outcome = self.stop_service(registry, &service).await;
            report.services.push(ServiceStop { service, outcome });
        }

        report.compose = self.teardown_compose(registry).await;
        report.registry_written = registry.persist()?;
        Ok(report)
    }

    /// `docker compose down` for the project the run brought up, if any.
    pub async fn teardown_compose(&self, registry: &mut PidRegistry) -> Option<ComposeTeardown> {
        let compose = registry.compose()?.clone();
        let error = match self.backend.teardown(&compose, &self.snapshot).await {
            Ok(()) => {
                registry.set_compose(None);
                None
            }
            Err(e) => {
                error!("Compose teardown of {} failed: {}", compose.project, e);
                Some(e.to_string())
            }
        };
        Some(ComposeTeardown {
            project: compose.project,
            error,
        })
    }
}

#[cfg(test)]
mod tests;
