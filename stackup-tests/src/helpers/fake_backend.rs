//! A scripted `ServiceBackend` for driving the orchestrator without real services

use async_trait::async_trait;
use parking_lot::Mutex;
use stackup_core::backend::{BackendError, ServiceBackend};
use stackup_core::config::ConfigSnapshot;
use stackup_core::health::{ProbeFailure, ProbeResult};
use stackup_core::plan::ServiceSpec;
use stackup_core::registry::{ComposeRecord, ProcessRecord, RecordHandle};
use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};

/// How a scripted service behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Starts and passes its first probe
    Healthy,
    /// Starts; probes fail transiently until attempt `n`
    HealthyAfter(u32),
    /// Starts; every probe fails transiently
    NeverHealthy,
    /// The start call itself fails
    StartFails,
    /// Starts, then the first probe reports the service gone
    ExitsDuringGate,
    /// Starts healthy but refuses to stop
    StopFails,
}

/// Backend answering from a behavior table.
///
/// Services with a declared port get a real loopback listener for as long as
/// they are "running", so port checks see them.
#[derive(Default)]
pub struct ScriptedBackend {
    behaviors: Mutex<HashMap<String, Behavior>>,
    events: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    listeners: Mutex<HashMap<String, TcpListener>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(behaviors: &[(&str, Behavior)]) -> Self {
        let backend = Self::default();
        for (name, behavior) in behaviors {
            backend.set_behavior(name, *behavior);
        }
        backend
    }

    pub fn set_behavior(&self, service: &str, behavior: Behavior) {
        self.behaviors.lock().insert(service.to_string(), behavior);
    }

    fn behavior(&self, service: &str) -> Behavior {
        self.behaviors
            .lock()
            .get(service)
            .copied()
            .unwrap_or(Behavior::Healthy)
    }

    /// Everything the backend was asked to do, in order: `start:svc`, `stop:svc`, `teardown:project`
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn started(&self, service: &str) -> bool {
        self.events().contains(&format!("start:{}", service))
    }

    pub fn stopped(&self, service: &str) -> bool {
        self.events().contains(&format!("stop:{}", service))
    }

    /// Services in the order they were started
    pub fn start_order(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    /// Services in the order they were stopped
    pub fn stop_order(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("stop:").map(str::to_string))
            .collect()
    }

    pub fn probe_attempts(&self, service: &str) -> u32 {
        self.attempts.lock().get(service).copied().unwrap_or(0)
    }

    /// Whether the fake still holds a listener for `service`
    pub fn holds_port(&self, service: &str) -> bool {
        self.listeners.lock().contains_key(service)
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl ServiceBackend for ScriptedBackend {
    async fn start(
        &self,
        spec: &ServiceSpec,
        _snapshot: &ConfigSnapshot,
    ) -> Result<RecordHandle, BackendError> {
        self.record(format!("start:{}", spec.name));
        self.attempts.lock().remove(&spec.name);

        if self.behavior(&spec.name) == Behavior::StartFails {
            return Err(BackendError::Command {
                service: spec.name.clone(),
                command: "fake start".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "scripted start failure".to_string(),
            });
        }

        if let Some(port) = spec.port {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
            self.listeners.lock().insert(spec.name.clone(), listener);
        }

        Ok(RecordHandle::Managed {
            label: format!("fake:{}", spec.name),
            start: spec.start.clone(),
        })
    }

    async fn probe(
        &self,
        spec: &ServiceSpec,
        _handle: &RecordHandle,
        _snapshot: &ConfigSnapshot,
    ) -> ProbeResult {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(spec.name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        match self.behavior(&spec.name) {
            Behavior::Healthy | Behavior::StopFails => Ok("up".to_string()),
            Behavior::HealthyAfter(n) if attempt >= n => Ok("up".to_string()),
            Behavior::HealthyAfter(_) | Behavior::NeverHealthy => {
                Err(ProbeFailure::transient("connection refused"))
            }
            Behavior::ExitsDuringGate => {
                self.listeners.lock().remove(&spec.name);
                Err(ProbeFailure::fatal("process exited"))
            }
            Behavior::StartFails => Err(ProbeFailure::fatal("never started")),
        }
    }

    async fn stop(
        &self,
        record: &ProcessRecord,
        _snapshot: &ConfigSnapshot,
    ) -> Result<(), BackendError> {
        self.record(format!("stop:{}", record.service));
        if self.behavior(&record.service) == Behavior::StopFails {
            return Err(BackendError::Command {
                service: record.service.clone(),
                command: "fake stop".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "scripted stop failure".to_string(),
            });
        }
        self.listeners.lock().remove(&record.service);
        Ok(())
    }

    async fn teardown(
        &self,
        compose: &ComposeRecord,
        _snapshot: &ConfigSnapshot,
    ) -> Result<(), BackendError> {
        self.record(format!("teardown:{}", compose.project));
        Ok(())
    }
}
