//! Error types for service orchestration

use std::time::Duration;

use crate::config::format_duration;

/// Errors that end or degrade a startup. Each names the service involved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Port {port} for service {service} is held by a process this stack did not start")]
    PortConflict { service: String, port: u16 },

    #[error("Service {service} failed to start: {message}")]
    ServiceStartFailure { service: String, message: String },

    #[error(
        "Service {service} did not become healthy within {} ({attempts} probe attempts): {last_error}",
        format_duration(.timeout)
    )]
    HealthTimeout {
        service: String,
        timeout: Duration,
        attempts: u32,
        last_error: String,
    },

    #[error("Service {service} could not be stopped: {message}")]
    ShutdownTimeout { service: String, message: String },

    #[error("Startup cancelled")]
    Cancelled,

    #[error("Registry error: {0}")]
    Registry(String),
}

impl OrchestratorError {
    pub fn service(&self) -> Option<&str> {
        match self {
            OrchestratorError::PortConflict { service, .. }
            | OrchestratorError::ServiceStartFailure { service, .. }
            | OrchestratorError::HealthTimeout { service, .. }
            | OrchestratorError::ShutdownTimeout { service, .. } => Some(service),
            OrchestratorError::Cancelled | OrchestratorError::Registry(_) => None,
        }
    }

    /// A hint for the operator on how to get past this failure.
    pub fn remediation(&self) -> String {
        match self {
            OrchestratorError::PortConflict { port, .. } => format!(
                "Free port {} (find the holder with `lsof -i :{}`) or change the service's port",
                port, port
            ),
            OrchestratorError::ServiceStartFailure { service, .. } => format!(
                "Check the start command of {} and its log under the state directory",
                service
            ),
            OrchestratorError::HealthTimeout { service, .. } => format!(
                "Check that {} is listening where its health probe points, or raise its timeout",
                service
            ),
            OrchestratorError::ShutdownTimeout { service, .. } => format!(
                "Stop {} manually, then run `stackup down` again to clear its record",
                service
            ),
            OrchestratorError::Cancelled => "Run `stackup up` again".to_string(),
            OrchestratorError::Registry(_) => {
                "Check that the state directory is writable".to_string()
            }
        }
    }
}
