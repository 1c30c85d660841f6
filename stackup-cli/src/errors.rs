use stackup_core::LaunchError;
use stackup_core::errors::StackError;
use stackup_core::orchestrator::{OrchestratorError, RunStatus};
use stackup_core::validator::GateStatus;
use std::path::PathBuf;
use thiserror::Error;

pub const EXIT_OK: i32 = 0;
pub const EXIT_VALIDATION_CRITICAL: i32 = 2;
pub const EXIT_VALIDATION_ERROR: i32 = 3;
pub const EXIT_HEALTH_TIMEOUT: i32 = 4;
pub const EXIT_PORT_CONFLICT: i32 = 5;
pub const EXIT_START_FAILURE: i32 = 6;
pub const EXIT_CONFIG: i32 = 7;
pub const EXIT_SHUTDOWN_INCOMPLETE: i32 = 8;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Stack file not found: {0}")]
    StackNotFound(PathBuf),

    #[error("{0}")]
    Stack(#[from] StackError),

    #[error("Validation status {0}")]
    Validation(GateStatus),

    #[error("{0}")]
    Startup(OrchestratorError),

    #[error("Interrupted")]
    Interrupted,

    #[error("Shutdown incomplete: {} still running", .0.join(", "))]
    ShutdownIncomplete(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::StackNotFound(_) | CliError::Stack(_) => EXIT_CONFIG,
            CliError::Validation(GateStatus::Critical) => EXIT_VALIDATION_CRITICAL,
            CliError::Validation(GateStatus::Error) => EXIT_VALIDATION_ERROR,
            CliError::Validation(GateStatus::Ok) => EXIT_OK,
            CliError::Startup(e) => match e {
                OrchestratorError::PortConflict { .. } => EXIT_PORT_CONFLICT,
                OrchestratorError::HealthTimeout { .. } => EXIT_HEALTH_TIMEOUT,
                OrchestratorError::ServiceStartFailure { .. } => EXIT_START_FAILURE,
                OrchestratorError::ShutdownTimeout { .. } => EXIT_SHUTDOWN_INCOMPLETE,
                OrchestratorError::Cancelled => EXIT_INTERRUPTED,
                OrchestratorError::Registry(_) => EXIT_CONFIG,
            },
            CliError::Interrupted => EXIT_INTERRUPTED,
            CliError::ShutdownIncomplete(_) => EXIT_SHUTDOWN_INCOMPLETE,
            CliError::Io(_) | CliError::Json(_) => EXIT_CONFIG,
        }
    }

    /// Whether the failure was already reported in full on stdout.
    pub fn is_reported(&self) -> bool {
        matches!(self, CliError::Validation(_))
    }
}

impl From<LaunchError> for CliError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::Validation { summary } => CliError::Validation(summary.status),
            LaunchError::Startup { result, .. } => {
                let stuck = result.rollback_failures.into_iter().next();
                match (result.status, result.failed, stuck) {
                    // Something left running outranks the interruption itself
                    (RunStatus::Cancelled, _, Some(stuck)) => CliError::Startup(stuck.error),
                    (RunStatus::Cancelled, _, None) => CliError::Interrupted,
                    (_, Some(failed), _) => CliError::Startup(failed.error),
                    (_, None, Some(stuck)) => CliError::Startup(stuck.error),
                    (status, None, None) => {
                        CliError::Startup(OrchestratorError::ServiceStartFailure {
                            service: String::new(),
                            message: format!("startup ended {}", status.as_str()),
                        })
                    }
                }
            }
            LaunchError::Stack(e) => CliError::Stack(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
