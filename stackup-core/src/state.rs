use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle state of a service within one orchestrator run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    WaitingHealth,
    Ready,
    Degraded, // optional service that failed its gate
    Failed,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::WaitingHealth => "waiting_health",
            ServiceState::Ready => "ready",
            ServiceState::Degraded => "degraded",
            ServiceState::Failed => "failed",
            ServiceState::Stopping => "stopping",
        }
    }

    /// Whether the stage barrier considers this service settled.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ServiceState::Ready | ServiceState::Degraded | ServiceState::Failed
        )
    }

    /// Legal edges of the lifecycle.
    pub fn can_transition_to(&self, to: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, to),
            (Stopped, Starting | Degraded | Failed)
                | (Starting, WaitingHealth | Degraded | Failed | Stopping)
                | (WaitingHealth, Ready | Degraded | Failed | Stopping)
                | (Ready | Degraded | Failed, Stopping)
                | (Stopping, Stopped | Failed)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub service: String,
    pub from: ServiceState,
    pub to: ServiceState,
    pub at: DateTime<Utc>,
}

/// Current state per service plus the ordered history of every transition.
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: BTreeMap<String, ServiceState>,
    history: Vec<Transition>,
}

impl StateTable {
    /// Every named service starts out Stopped.
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: services
                .into_iter()
                .map(|s| (s.into(), ServiceState::Stopped))
                .collect(),
            history: Vec::new(),
        }
    }

    pub fn get(&self, service: &str) -> Option<ServiceState> {
        self.states.get(service).copied()
    }

    /// Move `service` to `to`. Illegal edges and unknown services are refused
    /// and leave the table untouched.
    pub fn transition(&mut self, service: &str, to: ServiceState) -> bool {
        let Some(from) = self.states.get_mut(service) else {
            warn!("Transition for unknown service {} refused", service);
            return false;
        };
        if !from.can_transition_to(to) {
            warn!("Illegal transition for {}: {} -> {}", service, from, to);
            return false;
        }

        debug!("{}: {} -> {}", service, from, to);
        self.history.push(Transition {
            service: service.to_string(),
            from: *from,
            to,
            at: Utc::now(),
        });
        *from = to;
        true
    }

    pub fn states(&self) -> &BTreeMap<String, ServiceState> {
        &self.states
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Transitions recorded for one service, in order.
    #[cfg(test)]
    pub(crate) fn history_of(&self, service: &str) -> Vec<&Transition> {
        self.history.iter().filter(|t| t.service == service).collect()
    }
}

#[cfg(test)]
mod tests;
