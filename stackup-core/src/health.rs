//! Health probes and the health gate.
//!
//! A probe is one attempt (`run_probe`); the gate (`wait_healthy`) turns repeated
//! attempts into a verdict under a [`RetryPolicy`] deadline.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{BodyPredicate, ConfigSnapshot, ProbeSpec};
use crate::env::build_service_env;
use crate::retry::RetryPolicy;

/// A failed probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub message: String,
    /// The service can no longer become healthy (e.g. its process exited).
    /// A fatal failure ends the gate immediately.
    pub fatal: bool,
}

impl ProbeFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// Success carries a short description of what was observed.
pub type ProbeResult = Result<String, ProbeFailure>;

/// Run a single probe attempt bounded by `attempt_timeout`.
///
/// Command probes run in the stack directory with the snapshot environment.
pub async fn run_probe(
    probe: &ProbeSpec,
    attempt_timeout: Duration,
    snapshot: &ConfigSnapshot,
) -> ProbeResult {
    let attempt = async {
        match probe {
            ProbeSpec::Http {
                url,
                expected_status,
                body,
            } => probe_http(url, *expected_status, body.as_ref(), attempt_timeout).await,
            ProbeSpec::Tcp { address } => probe_tcp(address).await,
            ProbeSpec::Command { command } => probe_command(command, snapshot).await,
        }
    };

    match timeout(attempt_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ProbeFailure::transient(format!(
            "{} did not answer within {:?}",
            probe.target(),
            attempt_timeout
        ))),
    }
}

pub(crate) async fn probe_http(
    url: &str,
    expected_status: u16,
    body: Option<&BodyPredicate>,
    attempt_timeout: Duration,
) -> ProbeResult {
    let client = reqwest::Client::builder()
        .timeout(attempt_timeout)
        .build()
        .map_err(|e| ProbeFailure::fatal(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProbeFailure::transient(format!("GET {} failed: {}", url, e)))?;

    let status = response.status().as_u16();
    if status != expected_status {
        return Err(ProbeFailure::transient(format!(
            "GET {} returned {} (expected {})",
            url, status, expected_status
        )));
    }

    if let Some(predicate) = body {
        let text = response
            .text()
            .await
            .map_err(|e| ProbeFailure::transient(format!("GET {}: failed to read body: {}", url, e)))?;
        check_body(predicate, &text).map_err(ProbeFailure::transient)?;
    }

    Ok(format!("GET {} -> {}", url, status))
}

pub(crate) async fn probe_tcp(address: &str) -> ProbeResult {
    TcpStream::connect(address)
        .await
        .map(|_| format!("connected to {}", address))
        .map_err(|e| ProbeFailure::transient(format!("connect to {} failed: {}", address, e)))
}

pub(crate) async fn probe_command(command: &[String], snapshot: &ConfigSnapshot) -> ProbeResult {
    let Some((program, args)) = command.split_first() else {
        return Err(ProbeFailure::fatal("empty probe command"));
    };

    let status = Command::new(program)
        .args(args)
        .current_dir(snapshot.base_dir())
        .env_clear()
        .envs(build_service_env(snapshot, &Default::default()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| ProbeFailure::transient(format!("failed to run '{}': {}", program, e)))?;

    if status.success() {
        Ok(format!("'{}' exited 0", program))
    } else {
        Err(ProbeFailure::transient(format!(
            "'{}' exited with {}",
            command.join(" "),
            status
        )))
    }
}

/// Evaluate a body predicate. Every declared condition must hold.
pub fn check_body(predicate: &BodyPredicate, body: &str) -> Result<(), String> {
    if let Some(needle) = &predicate.contains {
        if !body.contains(needle.as_str()) {
            return Err(format!("response body does not contain '{}'", needle));
        }
    }

    if let Some(pointer) = &predicate.json_pointer {
        let json: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| format!("response body is not JSON: {}", e))?;
        let found = json
            .pointer(pointer)
            .ok_or_else(|| format!("JSON pointer '{}' not found in response", pointer))?;
        if let Some(expected) = &predicate.equals {
            if found != expected {
                return Err(format!(
                    "JSON pointer '{}' is {} (expected {})",
                    pointer, found, expected
                ));
            }
        }
    } else if let Some(expected) = &predicate.equals {
        let json: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| format!("response body is not JSON: {}", e))?;
        if &json != expected {
            return Err(format!("response body is {} (expected {})", json, expected));
        }
    }

    Ok(())
}

/// Outcome of a health gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Ready { attempts: u32, elapsed: Duration },
    /// The budget ran out; `last_error` is the last probe failure seen.
    TimedOut { attempts: u32, last_error: String },
    /// A probe reported a failure the service cannot recover from.
    Failed { attempts: u32, reason: String },
    Cancelled,
}

impl GateVerdict {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateVerdict::Ready { .. })
    }
}

/// Poll `probe` until it succeeds, fails fatally, the policy's deadline passes
/// or `cancel` fires.
///
/// Each attempt is also bounded by the remaining budget, so the gate never
/// outlives its deadline by more than scheduling noise.
pub async fn wait_healthy<F, Fut>(
    service: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> GateVerdict
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeResult>,
{
    let started = Instant::now();
    let mut schedule = policy.start();
    let mut last_error = String::from("no probe attempt completed");

    loop {
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return GateVerdict::Cancelled,
            res = timeout(schedule.remaining(), probe()) => res,
        };

        match attempt {
            Ok(Ok(observed)) => {
                let attempts = schedule.attempts() + 1;
                debug!("{} healthy after {} attempt(s): {}", service, attempts, observed);
                return GateVerdict::Ready {
                    attempts,
                    elapsed: started.elapsed(),
                };
            }
            Ok(Err(failure)) if failure.fatal => {
                return GateVerdict::Failed {
                    attempts: schedule.attempts() + 1,
                    reason: failure.message,
                };
            }
            Ok(Err(failure)) => {
                debug!("{} not healthy yet: {}", service, failure.message);
                last_error = failure.message;
            }
            Err(_) => {
                debug!("{} probe cut off by the gate deadline", service);
            }
        }

        let Some(delay) = schedule.next_delay() else {
            return GateVerdict::TimedOut {
                attempts: schedule.attempts(),
                last_error,
            };
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return GateVerdict::Cancelled,
            _ = sleep(delay) => {}
        }
    }
}
