//! The validate-then-start facade used by the CLI.
//!
//! `Stack::up` runs the validator to completion, refuses to start on a CRITICAL
//! result (and on ERROR unless told otherwise), then hands the plan to the
//! orchestrator. `down` and `status` work purely from the persisted registry, so
//! they function from a different invocation than the one that ran `up`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{DefaultBackend, ServiceBackend};
use crate::config::ConfigSnapshot;
use crate::errors::{Result, StackError};
use crate::orchestrator::{OrchestrationResult, ServiceOrchestrator};
use crate::plan::StartupPlan;
use crate::process::Liveness;
use crate::registry::{PidRegistry, RecordHandle};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::validator::{GateStatus, ValidationRule, ValidationSummary, Validator};

#[derive(Debug, Clone, Copy, Default)]
pub struct UpOptions {
    /// Start even when ERROR-severity rules failed. CRITICAL always blocks.
    pub ignore_errors: bool,
}

/// A successful `up`: every required service is Ready.
#[derive(Debug, Clone, Serialize)]
pub struct UpReport {
    pub validation: ValidationSummary,
    pub startup: OrchestrationResult,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Validation failed with status {}", .summary.status)]
    Validation { summary: Box<ValidationSummary> },

    #[error("Startup failed: {}", describe_startup(.result))]
    Startup {
        validation: Box<ValidationSummary>,
        result: Box<OrchestrationResult>,
    },

    #[error(transparent)]
    Stack(#[from] StackError),
}

fn describe_startup(result: &OrchestrationResult) -> String {
    match &result.failed {
        Some(failed) => failed.error.to_string(),
        None => result.status.as_str().to_string(),
    }
}

/// One registry record with its current liveness verdict.
#[derive(Debug, Clone, Serialize)]
pub struct RecordStatus {
    pub service: String,
    pub stage: usize,
    pub handle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub liveness: Liveness,
}

pub struct Stack {
    snapshot: Arc<ConfigSnapshot>,
    backend: Arc<dyn ServiceBackend>,
    extra_rules: Vec<ValidationRule>,
}

impl Stack {
    pub fn new(snapshot: Arc<ConfigSnapshot>, backend: Arc<dyn ServiceBackend>) -> Self {
        Self {
            snapshot,
            backend,
            extra_rules: Vec::new(),
        }
    }

    /// Load a stack file with the default backend.
    pub fn load(path: &Path, env_file_override: Option<&Path>) -> Result<Self> {
        let snapshot = ConfigSnapshot::load(path, env_file_override)?;
        Ok(Self::new(snapshot, Arc::new(DefaultBackend)))
    }

    /// Add a rule beyond the built-ins and the stack file's.
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.extra_rules.push(rule);
        self
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    pub fn plan(&self) -> Result<StartupPlan> {
        StartupPlan::build(&self.snapshot)
    }

    fn validator(&self) -> Validator {
        self.extra_rules
            .iter()
            .cloned()
            .fold(Validator::from_snapshot(&self.snapshot), Validator::with_rule)
    }

    pub async fn validate(&self, cancel: &CancellationToken) -> ValidationSummary {
        self.validator().validate(self.snapshot.clone(), cancel).await
    }

    /// Validate, then start the stack.
    ///
    /// Nothing is spawned unless validation allows it. On a required-service
    /// failure the orchestrator has already rolled back by the time this returns.
    pub async fn up(
        &self,
        options: UpOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<UpReport, LaunchError> {
        let summary = self.validate(cancel).await;
        if !summary.allows_start(options.ignore_errors) {
            warn!("Validation status {}; not starting", summary.status);
            return Err(LaunchError::Validation {
                summary: Box::new(summary),
            });
        }
        if summary.status == GateStatus::Error {
            warn!("Starting despite validation errors");
        }

        let plan = self.plan()?;
        let mut registry = PidRegistry::load(&self.snapshot.registry_path())?;
        registry.persist()?;

        info!(
            "Starting {} service(s) in {} stage(s)",
            plan.len(),
            plan.stages.len()
        );
        let orchestrator = ServiceOrchestrator::new(self.backend.clone(), self.snapshot.clone());
        let result = orchestrator.start(&plan, &mut registry, cancel).await;

        if result.status.is_up() {
            Ok(UpReport {
                validation: summary,
                startup: result,
            })
        } else {
            Err(LaunchError::Startup {
                validation: Box::new(summary),
                result: Box::new(result),
            })
        }
    }

    /// Stop everything the registry holds. Safe to call repeatedly.
    pub async fn down(&self) -> Result<ShutdownReport> {
        let mut registry = PidRegistry::load(&self.snapshot.registry_path())?;
        let coordinator = ShutdownCoordinator::new(self.backend.clone(), self.snapshot.clone());
        coordinator.shutdown(&mut registry).await
    }

    /// Registry records with their current liveness. Read-only.
    pub fn status(&self) -> Result<Vec<RecordStatus>> {
        let registry = PidRegistry::open(&self.snapshot.registry_path())?;
        Ok(registry
            .records()
            .iter()
            .map(|record| RecordStatus {
                service: record.service.clone(),
                stage: record.stage,
                handle: record.handle.describe(),
                command: match &record.handle {
                    RecordHandle::Process { fingerprint, .. } => {
                        Some(fingerprint.command_line())
                    }
                    RecordHandle::Managed { .. } => None,
                },
                started_at: record.started_at,
                port: record.port,
                liveness: record.liveness(),
            })
            .collect())
    }
}
