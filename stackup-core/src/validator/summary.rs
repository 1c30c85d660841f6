use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::ValidationRule;
use crate::config::{Category, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "PASS",
            Outcome::Failed => "FAIL",
            Outcome::Skipped => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub rule_id: String,
    pub category: Category,
    pub severity: Severity,
    pub outcome: Outcome,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl ValidationResult {
    pub(crate) fn passed(rule: &ValidationRule, message: String, elapsed: Duration) -> Self {
        Self::with_outcome(rule, Outcome::Passed, message, elapsed)
    }

    pub(crate) fn failed(rule: &ValidationRule, message: String, elapsed: Duration) -> Self {
        Self::with_outcome(rule, Outcome::Failed, message, elapsed)
    }

    pub(crate) fn skipped(rule: &ValidationRule, reason: String) -> Self {
        Self::with_outcome(rule, Outcome::Skipped, reason, Duration::ZERO)
    }

    fn with_outcome(
        rule: &ValidationRule,
        outcome: Outcome,
        message: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            rule_id: rule.id.clone(),
            category: rule.category,
            severity: rule.severity,
            outcome,
            message,
            remediation: match outcome {
                Outcome::Failed => rule.remediation.clone(),
                _ => None,
            },
            elapsed,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Whether validation lets the stack start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateStatus {
    Ok,
    Error,
    Critical,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateStatus::Ok => "OK",
            GateStatus::Error => "ERROR",
            GateStatus::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSummary {
    /// One result per rule, in declaration order.
    pub results: Vec<ValidationResult>,
    /// Failed results per severity.
    pub failures: BTreeMap<Severity, usize>,
    pub status: GateStatus,
}

impl ValidationSummary {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        let mut failures = BTreeMap::new();
        for result in results.iter().filter(|r| r.is_failure()) {
            *failures.entry(result.severity).or_insert(0) += 1;
        }

        let status = if failures.contains_key(&Severity::Critical) {
            GateStatus::Critical
        } else if failures.contains_key(&Severity::Error) {
            GateStatus::Error
        } else {
            GateStatus::Ok
        };

        Self {
            results,
            failures,
            status,
        }
    }

    pub fn failure_count(&self, severity: Severity) -> usize {
        self.failures.get(&severity).copied().unwrap_or(0)
    }

    pub fn get(&self, rule_id: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule_id == rule_id)
    }

    /// Failed results, most severe first, declaration order within a severity.
    pub fn failed(&self) -> Vec<&ValidationResult> {
        let mut failed: Vec<_> = self.results.iter().filter(|r| r.is_failure()).collect();
        failed.sort_by(|a, b| b.severity.cmp(&a.severity));
        failed
    }

    /// Whether `up` may proceed. CRITICAL always blocks; ERROR blocks unless ignored.
    pub fn allows_start(&self, ignore_errors: bool) -> bool {
        match self.status {
            GateStatus::Ok => true,
            GateStatus::Error => ignore_errors,
            GateStatus::Critical => false,
        }
    }
}
