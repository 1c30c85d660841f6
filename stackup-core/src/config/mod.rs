//! Configuration module for stackup
//!
//! This module provides:
//! - `StackConfig` - Root structure of the stack file
//! - `ServiceConfig` - Per-service start/stop/health configuration
//! - `ConfigSnapshot` - Immutable view of the stack file plus its resolved environment

mod duration;
mod health;
mod validation;

pub use duration::{format_duration, parse_duration};
pub use health::{BodyPredicate, HealthCheck, ProbeSpec};
pub use validation::{Category, CheckSpec, PathKind, RuleConfig, Severity, ValidationConfig};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::env::{expand_env, load_env_file};
use crate::errors::{Result, StackError};
use duration::{
    deserialize_duration, deserialize_optional_duration, serialize_duration,
    serialize_optional_duration,
};

/// Default stack file names, searched in this order.
pub const STACK_FILE_NAMES: &[&str] = &["stackup.yaml", "stackup.yml"];

const DEFAULT_STATE_DIR: &str = ".stackup";

// ============================================================================
// Service descriptors
// ============================================================================

/// How a service is launched. Tagged by `type` in the stack file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartSpec {
    /// A local process spawned and tracked by PID.
    Process {
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        environment: BTreeMap<String, String>,
    },
    /// A service of the stack's compose project.
    Compose {
        /// Compose service name; defaults to the stack service name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
    },
    /// Shell snippets run to start and stop something the backend does not track.
    Script {
        run: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<String>,
    },
}

impl StartSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            StartSpec::Process { .. } => "process",
            StartSpec::Compose { .. } => "compose",
            StartSpec::Script { .. } => "script",
        }
    }
}

/// How a tracked process is asked to stop.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StopSpec {
    #[serde(default = "default_stop_signal")]
    pub signal: String,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub grace_period: Option<Duration>,
}

impl Default for StopSpec {
    fn default() -> Self {
        Self {
            signal: default_stop_signal(),
            grace_period: None,
        }
    }
}

/// Per-service configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub start: StartSpec,
    #[serde(default)]
    pub stop: StopSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// A required service aborts the whole startup when it fails its gate.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Stage timeout for this service's health gate.
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_file")]
    pub file: PathBuf,
    /// Compose project name (`-p`). Scopes every container this stack owns.
    pub project: String,
}

/// Stack-wide timing defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub timeout: Duration,
    #[serde(default = "default_health_interval", deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub health_interval: Duration,
    #[serde(default = "default_probe_timeout", deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub probe_timeout: Duration,
    #[serde(default = "default_grace_period", deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub grace_period: Duration,
    #[serde(default = "default_check_timeout", deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub check_timeout: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            health_interval: default_health_interval(),
            probe_timeout: default_probe_timeout(),
            grace_period: default_grace_period(),
            check_timeout: default_check_timeout(),
        }
    }
}

// ============================================================================
// StackConfig
// ============================================================================

/// Root of the stack file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose: Option<ComposeConfig>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

impl StackConfig {
    /// Maximum stack file size (1MB)
    const MAX_STACK_FILE_SIZE: u64 = 1024 * 1024;

    /// Parse a stack document from YAML text, expanding `${VAR}` in every string
    /// value against `env` first.
    pub fn parse(path: &Path, contents: &str, env: &BTreeMap<String, String>) -> Result<Self> {
        let mut root = parse_value(path, contents)?;
        expand_value_tree(&mut root, env);
        serde_path_to_error::deserialize(root).map_err(|e| StackError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

fn parse_value(path: &Path, contents: &str) -> Result<serde_yaml::Value> {
    let de = serde_yaml::Deserializer::from_str(contents);
    serde_path_to_error::deserialize(de).map_err(|e| StackError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn expand_value_tree(value: &mut serde_yaml::Value, env: &BTreeMap<String, String>) {
    use serde_yaml::Value;
    match value {
        Value::String(s) if s.contains("${") => *s = expand_env(s, env),
        Value::Sequence(items) => items.iter_mut().for_each(|v| expand_value_tree(v, env)),
        Value::Mapping(map) => map.iter_mut().for_each(|(_, v)| expand_value_tree(v, env)),
        Value::Tagged(tagged) => expand_value_tree(&mut tagged.value, env),
        _ => {}
    }
}

/// Validate service name format
///
/// Service names must contain only lowercase letters, digits, underscores and hyphens.
pub fn validate_service_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("Service name cannot be empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(format!(
            "Service name '{}' contains invalid characters. Only lowercase letters (a-z), digits (0-9), underscores (_), and hyphens (-) are allowed.",
            name
        ));
    }
    Ok(())
}

// ============================================================================
// ConfigSnapshot
// ============================================================================

/// Outcome of loading the configured env file.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvFileStatus {
    NotConfigured,
    Loaded(PathBuf),
    Failed { path: PathBuf, message: String },
}

/// Immutable view of the stack: parsed config, resolved environment and paths.
///
/// Built once per run and shared as `Arc<ConfigSnapshot>` by the validator,
/// the orchestrator and the backends. Nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub stack: StackConfig,
    env: BTreeMap<String, String>,
    base_dir: PathBuf,
    state_dir: PathBuf,
    source: Option<PathBuf>,
    env_file: EnvFileStatus,
    taken_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Load a stack file and the environment it refers to.
    ///
    /// The process environment is overlaid by the env file (file wins). A missing
    /// or malformed env file does not fail the load; it is reported through
    /// [`ConfigSnapshot::env_file_status`] so validation can surface it.
    pub fn load(path: &Path, env_file_override: Option<&Path>) -> Result<Arc<Self>> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StackError::ConfigNotFound(path.to_path_buf())
            } else {
                StackError::Internal(format!("Failed to stat stack file '{}': {}", path.display(), e))
            }
        })?;
        if metadata.len() > StackConfig::MAX_STACK_FILE_SIZE {
            return Err(StackError::Config(format!(
                "Stack file '{}' is too large ({} bytes, max {} bytes)",
                path.display(),
                metadata.len(),
                StackConfig::MAX_STACK_FILE_SIZE,
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // The env file location must be known before expansion, so peek at it raw.
        let env_file = match env_file_override {
            Some(p) => Some(p.to_path_buf()),
            None => parse_value(path, &contents)?
                .get("env_file")
                .and_then(|v| v.as_str())
                .map(PathBuf::from),
        };

        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        let env_file = match env_file {
            None => EnvFileStatus::NotConfigured,
            Some(file) => {
                let resolved = resolve_against(&base_dir, &file);
                match load_env_file(&resolved) {
                    Ok(vars) => {
                        debug!("Loaded {} variables from {:?}", vars.len(), resolved);
                        env.extend(vars);
                        EnvFileStatus::Loaded(resolved)
                    }
                    Err(e) => {
                        warn!("Env file unusable: {}", e);
                        EnvFileStatus::Failed {
                            path: resolved,
                            message: e.to_string(),
                        }
                    }
                }
            }
        };

        let stack = StackConfig::parse(path, &contents, &env)?;
        let mut snapshot = Self::from_parts(stack, base_dir, env);
        snapshot.source = Some(path.to_path_buf());
        snapshot.env_file = env_file;
        Ok(Arc::new(snapshot))
    }

    /// Build a snapshot from already-parsed parts.
    pub fn from_parts(stack: StackConfig, base_dir: PathBuf, env: BTreeMap<String, String>) -> Self {
        let state_dir = resolve_against(
            &base_dir,
            stack
                .state_dir
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_STATE_DIR)),
        );
        Self {
            stack,
            env,
            base_dir,
            state_dir,
            source: None,
            env_file: EnvFileStatus::NotConfigured,
            taken_at: Utc::now(),
        }
    }

    pub fn with_env_file_status(mut self, status: EnvFileStatus) -> Self {
        self.env_file = status;
        self
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn env_map(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn env_file_status(&self) -> &EnvFileStatus {
        &self.env_file
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Resolve a configured path relative to the stack file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        resolve_against(&self.base_dir, path)
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        base.join(path)
    } else {
        path.to_path_buf()
    }
}

/// Find a stack file in `start_dir` or any of its parents.
pub fn find_stack_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    loop {
        for name in STACK_FILE_NAMES {
            let candidate = current.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("docker-compose.yml")
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(5)
}
