//! Validation rule configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::duration::{deserialize_optional_duration, serialize_optional_duration};
use super::health::BodyPredicate;

/// Severity lattice: `Critical > Error > Warning > Info`.
///
/// Declaration order drives the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Only CRITICAL and ERROR affect whether the stack may start.
    pub fn is_gating(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Env,
    File,
    Connectivity,
    Credentials,
    Filesystem,
    Security,
    Performance,
    Stack,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Env => "env",
            Category::File => "file",
            Category::Connectivity => "connectivity",
            Category::Credentials => "credentials",
            Category::Filesystem => "filesystem",
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Stack => "stack",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    #[default]
    Any,
    File,
    Dir,
}

/// The check a rule performs. Tagged by `type` in the stack file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckSpec {
    EnvVar {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default = "default_true")]
        non_empty: bool,
    },
    FileExists {
        path: PathBuf,
        #[serde(default)]
        kind: PathKind,
    },
    WritableDir { path: PathBuf },
    FreeDisk { path: PathBuf, min_mb: u64 },
    MinMemory { min_mb: u64 },
    MinCpus { count: usize },
    Tcp { address: String },
    Http {
        url: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<BodyPredicate>,
    },
    Command { command: Vec<String> },
    CredentialSet {
        mode_var: String,
        mode: String,
        fields: Vec<String>,
    },
    FilePermissions { path: PathBuf, max_mode: String },
    NotPlaceholder {
        name: String,
        #[serde(default = "default_placeholders")]
        placeholders: Vec<String>,
    },
}

impl CheckSpec {
    /// Category used when the rule does not declare one.
    pub fn default_category(&self) -> Category {
        match self {
            CheckSpec::EnvVar { .. } => Category::Env,
            CheckSpec::FileExists { .. } => Category::File,
            CheckSpec::WritableDir { .. } | CheckSpec::FreeDisk { .. } => Category::Filesystem,
            CheckSpec::MinMemory { .. } | CheckSpec::MinCpus { .. } => Category::Performance,
            CheckSpec::Tcp { .. } | CheckSpec::Http { .. } | CheckSpec::Command { .. } => {
                Category::Connectivity
            }
            CheckSpec::CredentialSet { .. } => Category::Credentials,
            CheckSpec::FilePermissions { .. } | CheckSpec::NotPlaceholder { .. } => {
                Category::Security
            }
        }
    }

    /// Whether the check performs network or process I/O.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            CheckSpec::Tcp { .. } | CheckSpec::Http { .. } | CheckSpec::Command { .. }
        )
    }
}

/// One rule as declared under `validation.rules`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    pub check: CheckSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_true() -> bool {
    true
}

fn default_expected_status() -> u16 {
    200
}

fn default_placeholders() -> Vec<String> {
    ["changeme", "password", "secret", "your-api-key", "xxx", "todo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
