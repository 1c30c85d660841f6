//! Staged startup with health gating and rollback.
//!
//! This module provides a `ServiceOrchestrator` that walks a `StartupPlan` stage by
//! stage:
//! - port check (reclaiming ports held by our own prior run)
//! - concurrent launches through the `ServiceBackend`, recorded before any probing
//! - concurrent health gates; the stage is a barrier on their verdicts
//! - rollback of everything this run started when a required service fails
//!
//! Service states live in a `StateTable` behind a mutex so callers can observe
//! progress while a start is in flight.

mod error;

pub use error::OrchestratorError;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, ServiceBackend};
use crate::config::{ConfigSnapshot, StartSpec};
use crate::errors::Result;
use crate::health::{GateVerdict, wait_healthy};
use crate::plan::{ServiceSpec, Stage, StartupPlan};
use crate::ports::{PortStatus, check_port, port_in_use};
use crate::registry::{ComposeRecord, PidRegistry, ProcessRecord, RecordHandle};
use crate::shutdown::{ServiceStop, ShutdownCoordinator, ShutdownReport};
use crate::state::{ServiceState, StateTable, Transition};

/// Overall outcome of a startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every service is Ready.
    Ready,
    /// Every required service is Ready; at least one optional service is Degraded.
    Degraded,
    /// A required service failed and the run was rolled back.
    Failed,
    /// Cancelled; everything started was rolled back.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ready => "ready",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, RunStatus::Ready | RunStatus::Degraded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedService {
    pub service: String,
    pub stage: usize,
    #[serde(serialize_with = "serialize_error")]
    pub error: OrchestratorError,
}

fn serialize_error<S: serde::Serializer>(
    error: &OrchestratorError,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub status: RunStatus,
    pub services: BTreeMap<String, ServiceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<FailedService>,
    /// Optional services that did not make it, with the reason.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<FailedService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<ShutdownReport>,
    /// Services the rollback could not confirm stopped. Their records are kept.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rollback_failures: Vec<FailedService>,
    pub history: Vec<Transition>,
}

/// A launch that succeeded, waiting for its health gate.
struct Launched<'a> {
    spec: &'a ServiceSpec,
    handle: RecordHandle,
}

/// Why a stage did not complete.
enum StageAbort {
    Failed(FailedService),
    Cancelled,
}

pub struct ServiceOrchestrator {
    backend: Arc<dyn ServiceBackend>,
    snapshot: Arc<ConfigSnapshot>,
    coordinator: ShutdownCoordinator,
    state: Arc<Mutex<StateTable>>,
}

impl ServiceOrchestrator {
    pub fn new(backend: Arc<dyn ServiceBackend>, snapshot: Arc<ConfigSnapshot>) -> Self {
        let coordinator = ShutdownCoordinator::new(backend.clone(), snapshot.clone());
        Self {
            backend,
            snapshot,
            coordinator,
            state: Arc::new(Mutex::new(StateTable::default())),
        }
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn state_of(&self, service: &str) -> Option<ServiceState> {
        self.state.lock().get(service)
    }

    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        self.state.lock().states().clone()
    }

    pub fn history(&self) -> Vec<Transition> {
        self.state.lock().history().to_vec()
    }

    fn transition(&self, service: &str, to: ServiceState) {
        self.state.lock().transition(service, to);
    }

    /// Start every stage of `plan` in order.
    ///
    /// Never returns early without a consistent registry: every launch is
    /// recorded and persisted before its gate runs, and a failed or cancelled
    /// run stops what it started before returning.
    pub async fn start(
        &self,
        plan: &StartupPlan,
        registry: &mut PidRegistry,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        *self.state.lock() = StateTable::new(plan.services().map(|s| s.name.clone()));

        let mut started: Vec<String> = Vec::new();
        let mut degraded: Vec<FailedService> = Vec::new();

        for stage in &plan.stages {
            if cancel.is_cancelled() {
                return self
                    .abort(plan, StageAbort::Cancelled, registry, &started, degraded)
                    .await;
            }

            info!(
                "Starting stage {}/{}: {}",
                stage.index,
                plan.stages.len(),
                stage
                    .services
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            if let Err(abort) = self
                .run_stage(stage, registry, cancel, &mut started, &mut degraded)
                .await
            {
                return self.abort(plan, abort, registry, &started, degraded).await;
            }
            debug_assert!(
                stage
                    .services
                    .iter()
                    .all(|s| self.state_of(&s.name).is_some_and(|st| st.is_settled())),
                "stage {} barrier passed with an unsettled service",
                stage.index
            );
            debug!("Stage {} barrier passed", stage.index);
        }

        let status = if degraded.is_empty() {
            RunStatus::Ready
        } else {
            RunStatus::Degraded
        };
        info!("Startup finished: {}", status.as_str());

        let table = self.state.lock();
        OrchestrationResult {
            status,
            services: table.states().clone(),
            failed: None,
            degraded,
            rollback: None,
            rollback_failures: Vec::new(),
            history: table.history().to_vec(),
        }
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        registry: &mut PidRegistry,
        cancel: &CancellationToken,
        started: &mut Vec<String>,
        degraded: &mut Vec<FailedService>,
    ) -> std::result::Result<(), StageAbort> {
        // 1. Ports, and leftovers of a prior run under the same name
        let mut launchable: Vec<&ServiceSpec> = Vec::new();
        for spec in &stage.services {
            self.reclaim_prior_record(registry, &spec.name).await;

            match self.claim_port(spec, registry).await {
                Ok(()) => launchable.push(spec),
                Err(e) => self.settle_failure(spec, e, degraded)?,
            }
        }

        // 2. Launch concurrently, then record every launch before probing anything
        for spec in &launchable {
            self.transition(&spec.name, ServiceState::Starting);
        }
        let launches = join_all(launchable.iter().map(|spec| async move {
            let result = self.backend.start(spec, &self.snapshot).await;
            (*spec, result)
        }))
        .await;

        let mut launched: Vec<Launched<'_>> = Vec::new();
        let mut launch_failures: Vec<(&ServiceSpec, BackendError)> = Vec::new();
        for (spec, result) in launches {
            match result {
                Ok(handle) => {
                    info!("Service {} launched ({})", spec.name, handle.describe());
                    self.record_launch(registry, spec, &handle);
                    started.push(spec.name.clone());
                    launched.push(Launched { spec, handle });
                }
                Err(e) => launch_failures.push((spec, e)),
            }
        }

        if let Err(e) = registry.persist() {
            error!("Failed to persist registry: {}", e);
            return Err(StageAbort::Failed(FailedService {
                service: launchable.first().map(|s| s.name.clone()).unwrap_or_default(),
                stage: stage.index,
                error: OrchestratorError::Registry(e.to_string()),
            }));
        }

        let mut first_failure: Option<FailedService> = None;
        for (spec, e) in launch_failures {
            let failure = OrchestratorError::ServiceStartFailure {
                service: spec.name.clone(),
                message: e.to_string(),
            };
            if let Err(abort) = self.settle_failure(spec, failure, degraded) {
                if first_failure.is_none() {
                    if let StageAbort::Failed(f) = abort {
                        first_failure = Some(f);
                    }
                }
            }
        }
        if let Some(failure) = first_failure {
            return Err(StageAbort::Failed(failure));
        }

        if cancel.is_cancelled() {
            return Err(StageAbort::Cancelled);
        }

        // 3. Health gates, concurrently; the stage waits for all verdicts
        for l in &launched {
            self.transition(&l.spec.name, ServiceState::WaitingHealth);
        }
        let verdicts = join_all(launched.iter().map(|l| async move {
            let verdict = wait_healthy(&l.spec.name, &l.spec.retry, cancel, || {
                self.backend.probe(l.spec, &l.handle, &self.snapshot)
            })
            .await;
            (l.spec, verdict)
        }))
        .await;

        let mut cancelled = false;
        for (spec, verdict) in verdicts {
            let failure = match verdict {
                GateVerdict::Ready { attempts, elapsed } => {
                    info!(
                        "Service {} is ready ({} attempt(s), {:?})",
                        spec.name, attempts, elapsed
                    );
                    self.transition(&spec.name, ServiceState::Ready);
                    continue;
                }
                GateVerdict::Cancelled => {
                    cancelled = true;
                    continue;
                }
                GateVerdict::TimedOut {
                    attempts,
                    last_error,
                } => OrchestratorError::HealthTimeout {
                    service: spec.name.clone(),
                    timeout: spec.timeout,
                    attempts,
                    last_error,
                },
                GateVerdict::Failed { reason, .. } => OrchestratorError::ServiceStartFailure {
                    service: spec.name.clone(),
                    message: reason,
                },
            };
            if let Err(abort) = self.settle_failure(spec, failure, degraded) {
                if first_failure.is_none() {
                    if let StageAbort::Failed(f) = abort {
                        first_failure = Some(f);
                    }
                }
            }
        }

        if let Some(failure) = first_failure {
            return Err(StageAbort::Failed(failure));
        }
        if cancelled {
            return Err(StageAbort::Cancelled);
        }
        Ok(())
    }

    /// A required service failing aborts the stage; an optional one degrades.
    fn settle_failure(
        &self,
        spec: &ServiceSpec,
        failure: OrchestratorError,
        degraded: &mut Vec<FailedService>,
    ) -> std::result::Result<(), StageAbort> {
        let failed = FailedService {
            service: spec.name.clone(),
            stage: spec.stage,
            error: failure,
        };
        if spec.required {
            error!("{}", failed.error);
            self.transition(&spec.name, ServiceState::Failed);
            Err(StageAbort::Failed(failed))
        } else {
            warn!("Optional service degraded: {}", failed.error);
            self.transition(&spec.name, ServiceState::Degraded);
            degraded.push(failed);
            Ok(())
        }
    }

    /// A record for this service from an earlier run is stopped before relaunching,
    /// so the new record never orphans a live process.
    async fn reclaim_prior_record(&self, registry: &mut PidRegistry, service: &str) {
        if registry.get(service).is_none() {
            return;
        }
        info!("Reclaiming service {} from a previous run", service);
        let outcome = self.coordinator.stop_service(registry, service).await;
        if !outcome.is_stopped() {
            warn!(
                "Could not stop previous instance of {}: {}",
                service,
                outcome.describe()
            );
        }
    }

    async fn claim_port(
        &self,
        spec: &ServiceSpec,
        registry: &mut PidRegistry,
    ) -> std::result::Result<(), OrchestratorError> {
        let Some(port) = spec.port else {
            return Ok(());
        };

        match check_port(port, registry) {
            PortStatus::Free => Ok(()),
            PortStatus::Foreign => Err(OrchestratorError::PortConflict {
                service: spec.name.clone(),
                port,
            }),
            PortStatus::OwnedByPriorRun(record) => {
                info!(
                    "Port {} held by {} from a previous run; reclaiming",
                    port, record.service
                );
                let outcome = self.coordinator.stop_service(registry, &record.service).await;
                if outcome.is_stopped() && !port_in_use(port) {
                    Ok(())
                } else {
                    Err(OrchestratorError::PortConflict {
                        service: spec.name.clone(),
                        port,
                    })
                }
            }
        }
    }

    fn record_launch(&self, registry: &mut PidRegistry, spec: &ServiceSpec, handle: &RecordHandle) {
        registry.insert(ProcessRecord {
            service: spec.name.clone(),
            stage: spec.stage,
            handle: handle.clone(),
            started_at: chrono::Utc::now(),
            port: spec.port,
            stop: spec.stop.clone(),
        });

        if let (StartSpec::Compose { .. }, Some(compose)) =
            (&spec.start, self.snapshot.stack.compose.as_ref())
        {
            registry.set_compose(Some(ComposeRecord {
                project: compose.project.clone(),
                file: self.snapshot.resolve_path(&compose.file),
            }));
        }
    }

    /// Roll back everything `started` (reverse order) and build the result.
    async fn abort(
        &self,
        plan: &StartupPlan,
        abort: StageAbort,
        registry: &mut PidRegistry,
        started: &[String],
        degraded: Vec<FailedService>,
    ) -> OrchestrationResult {
        let (status, failed) = match abort {
            StageAbort::Failed(f) => {
                error!("Startup aborted: {}", f.error);
                (RunStatus::Failed, Some(f))
            }
            StageAbort::Cancelled => {
                warn!("Startup cancelled; rolling back");
                (RunStatus::Cancelled, None)
            }
        };

        let rollback = self.rollback(registry, started).await;
        let rollback_failures = unstopped(plan, &rollback);

        let table = self.state.lock();
        OrchestrationResult {
            status,
            services: table.states().clone(),
            failed,
            degraded,
            rollback: Some(rollback),
            rollback_failures,
            history: table.history().to_vec(),
        }
    }

    async fn rollback(&self, registry: &mut PidRegistry, started: &[String]) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if !started.is_empty() {
            info!("Rolling back {} service(s)", started.len());
        }

        for service in started.iter().rev() {
            // A Failed service keeps its state; its process is still stopped
            let keep_state = self.state_of(service) == Some(ServiceState::Failed);
            if !keep_state {
                self.transition(service, ServiceState::Stopping);
            }

            let outcome = self.coordinator.stop_service(registry, service).await;
            if !keep_state {
                let to = if outcome.is_stopped() {
                    ServiceState::Stopped
                } else {
                    ServiceState::Failed
                };
                self.transition(service, to);
            }
            report.services.push(ServiceStop {
                service: service.clone(),
                outcome,
            });
        }

        report.compose = self.coordinator.teardown_compose(registry).await;
        report.registry_written = match registry.persist() {
            Ok(written) => written,
            Err(e) => {
                error!("Failed to persist registry after rollback: {}", e);
                false
            }
        };
        report
    }

    /// Stop everything the registry holds and settle every known service to
    /// Stopped. Calling it again when nothing runs is a no-op.
    pub async fn stop(&self, registry: &mut PidRegistry) -> Result<ShutdownReport> {
        let active: Vec<String> = self
            .states()
            .into_iter()
            .filter(|(_, state)| *state != ServiceState::Stopped)
            .map(|(name, _)| name)
            .collect();
        for service in &active {
            self.transition(service, ServiceState::Stopping);
        }

        let report = self.coordinator.shutdown(registry).await?;

        for service in &active {
            let to = if registry.get(service).is_some() {
                ServiceState::Failed
            } else {
                ServiceState::Stopped
            };
            self.transition(service, to);
        }
        Ok(report)
    }
}

/// Rollback stops that left something running, as `ShutdownTimeout` failures.
fn unstopped(plan: &StartupPlan, report: &ShutdownReport) -> Vec<FailedService> {
    report
        .incomplete()
        .into_iter()
        .map(|stop| {
            let error = OrchestratorError::ShutdownTimeout {
                service: stop.service.clone(),
                message: stop.outcome.describe(),
            };
            error!("{}", error);
            FailedService {
                service: stop.service.clone(),
                stage: plan.service(&stop.service).map(|s| s.stage).unwrap_or_default(),
                error,
            }
        })
        .collect()
}
