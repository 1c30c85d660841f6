//! Health probe configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::duration::{deserialize_optional_duration, serialize_optional_duration};
use crate::retry::JitterPolicy;

/// What to probe and what counts as success.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeSpec {
    /// GET `url`; succeed on `expected_status` and, if given, the body predicate.
    Http {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<BodyPredicate>,
    },
    /// Bare connectivity: a TCP connect to `address` (host:port).
    Tcp { address: String },
    /// Run `command`; succeed when it exits 0.
    Command { command: Vec<String> },
}

impl ProbeSpec {
    /// Short human-readable target, used in logs and reports.
    pub fn target(&self) -> String {
        match self {
            ProbeSpec::Http { url, .. } => url.clone(),
            ProbeSpec::Tcp { address } => format!("tcp://{}", address),
            ProbeSpec::Command { command } => command.join(" "),
        }
    }
}

/// Structural predicate on an HTTP response body. All declared conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BodyPredicate {
    /// Body must contain this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// JSON pointer (RFC 6901) into the parsed body, e.g. `/status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
    /// Value expected at `json_pointer`. When absent the pointer only has to resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<serde_json::Value>,
}

/// Per-service health check: the probe plus its polling cadence.
///
/// Unset timings fall back to the stack's `defaults` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheck {
    pub probe: ProbeSpec,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
    /// Upper bound for one probe attempt.
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub probe_timeout: Option<Duration>,
    /// Multiplicative growth of the polling interval (1.0 = fixed interval).
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    #[serde(default)]
    pub jitter: JitterPolicy,
}

impl HealthCheck {
    pub fn new(probe: ProbeSpec) -> Self {
        Self {
            probe,
            interval: None,
            probe_timeout: None,
            backoff: default_backoff(),
            jitter: JitterPolicy::None,
        }
    }
}

fn default_expected_status() -> u16 {
    200
}

fn default_backoff() -> f64 {
    1.0
}
