//! Startup plan: services resolved against the stack defaults and grouped into stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{ConfigSnapshot, ProbeSpec, StartSpec, validate_service_name};
use crate::deps::start_levels;
use crate::errors::{Result, StackError};
use crate::retry::RetryPolicy;

/// How a service is stopped, with defaults applied.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StopPolicy {
    pub signal: String,
    pub grace_period: Duration,
}

/// A fully-resolved service ready to be handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    /// 1-based stage number.
    pub stage: usize,
    pub start: StartSpec,
    pub stop: StopPolicy,
    /// `None` means the backend's own liveness view decides readiness.
    pub probe: Option<ProbeSpec>,
    pub probe_timeout: Duration,
    #[serde(skip)]
    pub retry: RetryPolicy,
    pub required: bool,
    /// Health gate budget for this service.
    pub timeout: Duration,
    pub port: Option<u16>,
    pub depends_on: Vec<String>,
}

/// A barrier-synchronized group of services startable concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub index: usize,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StartupPlan {
    pub stages: Vec<Stage>,
}

// Upper bound for a single backoff step
const MAX_PROBE_INTERVAL: Duration = Duration::from_secs(30);

impl StartupPlan {
    /// Build the plan from a snapshot.
    ///
    /// Fails on invalid service names, unknown dependencies and cycles. The
    /// validator reports the same problems as CRITICAL rules; this is the
    /// planner's own guard for callers that skip validation.
    pub fn build(snapshot: &ConfigSnapshot) -> Result<Self> {
        let stack = &snapshot.stack;

        for name in stack.services.keys() {
            validate_service_name(name).map_err(StackError::Config)?;
        }

        let graph: BTreeMap<String, Vec<String>> = stack
            .services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.depends_on.clone()))
            .collect();
        let levels = start_levels(&graph)?;

        let defaults = &stack.defaults;
        let mut stages = Vec::with_capacity(levels.len());
        for (level, names) in levels.into_iter().enumerate() {
            let index = level + 1;
            let mut services = Vec::with_capacity(names.len());
            for name in names {
                let svc = stack
                    .services
                    .get(&name)
                    .ok_or_else(|| StackError::ServiceNotFound(name.clone()))?;

                let timeout = svc.timeout.unwrap_or(defaults.timeout);
                let hc = svc.healthcheck.as_ref();
                let interval = hc.and_then(|h| h.interval).unwrap_or(defaults.health_interval);
                let mut retry = RetryPolicy::fixed(interval, timeout);
                if let Some(hc) = hc {
                    if hc.backoff > 1.0 {
                        retry = retry.with_backoff(hc.backoff, MAX_PROBE_INTERVAL);
                    }
                    retry = retry.with_jitter(hc.jitter);
                }

                // Without an explicit probe a declared port is the readiness signal
                let probe = match (hc, svc.port) {
                    (Some(hc), _) => Some(hc.probe.clone()),
                    (None, Some(port)) => Some(ProbeSpec::Tcp {
                        address: format!("127.0.0.1:{}", port),
                    }),
                    (None, None) => None,
                };

                services.push(ServiceSpec {
                    name: name.clone(),
                    stage: index,
                    start: svc.start.clone(),
                    stop: StopPolicy {
                        signal: svc.stop.signal.clone(),
                        grace_period: svc.stop.grace_period.unwrap_or(defaults.grace_period),
                    },
                    probe,
                    probe_timeout: hc
                        .and_then(|h| h.probe_timeout)
                        .unwrap_or(defaults.probe_timeout),
                    retry,
                    required: svc.required,
                    timeout,
                    port: svc.port,
                    depends_on: svc.depends_on.clone(),
                });
            }
            stages.push(Stage { index, services });
        }

        Ok(Self { stages })
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services().find(|s| s.name == name)
    }

    /// All services in start order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.stages.iter().flat_map(|s| s.services.iter())
    }

    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.services.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
