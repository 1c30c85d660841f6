//! Configuration validator
//!
//! This module provides:
//! - `Check` - the capability a rule evaluates, one isolated task per run
//! - `ValidationRule` - id, category, severity, prerequisites and timeout around a check
//! - `Validator` - runs every rule to completion and aggregates a `ValidationSummary`
//!
//! A check that hangs, panics or errors only ever fails its own rule.

mod checks;
mod summary;

pub use checks::{CheckFn, builtin_rules, check_fn};
pub use summary::{GateStatus, Outcome, ValidationResult, ValidationSummary};

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Category, ConfigSnapshot, RuleConfig, Severity};
use crate::deps::layer_graph;

/// What a check sees when it runs.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub snapshot: Arc<ConfigSnapshot>,
    /// The rule's timeout. Checks that retry keep their own loop inside it.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass(String),
    Fail {
        message: String,
        /// Overrides the rule's remediation when the check knows better.
        remediation: Option<String>,
    },
    /// The rule does not apply to this configuration.
    Skip(String),
}

impl CheckOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        CheckOutcome::Pass(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        CheckOutcome::Skip(reason.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        CheckOutcome::Fail {
            message: message.into(),
            remediation: None,
        }
    }

    pub fn fail_with(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        CheckOutcome::Fail {
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }
}

#[async_trait]
pub trait Check: Send + Sync + 'static {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome;
}

#[derive(Clone)]
pub struct ValidationRule {
    pub id: String,
    pub category: Category,
    pub severity: Severity,
    pub depends_on: Vec<String>,
    pub timeout: Option<Duration>,
    pub remediation: Option<String>,
    pub check: Arc<dyn Check>,
}

impl std::fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRule")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .field("depends_on", &self.depends_on)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ValidationRule {
    pub fn new(
        id: impl Into<String>,
        category: Category,
        severity: Severity,
        check: impl Check,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            severity,
            depends_on: Vec::new(),
            timeout: None,
            remediation: None,
            check: Arc::new(check),
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation = Some(text.into());
        self
    }

    /// Build a rule from its stack file declaration.
    pub fn from_config(config: &RuleConfig) -> Self {
        Self {
            id: config.id.clone(),
            category: config
                .category
                .unwrap_or_else(|| config.check.default_category()),
            severity: config.severity,
            depends_on: config.depends_on.clone(),
            timeout: config.timeout,
            remediation: config.remediation.clone(),
            check: Arc::new(config.check.clone()),
        }
    }
}

pub struct Validator {
    rules: Vec<ValidationRule>,
    default_timeout: Duration,
}

impl Validator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            rules: Vec::new(),
            default_timeout,
        }
    }

    /// Built-in structural rules followed by the stack file's rules.
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let mut validator = Self::new(snapshot.stack.defaults.check_timeout);
        validator.rules.extend(builtin_rules());
        validator
            .rules
            .extend(snapshot.stack.validation.rules.iter().map(ValidationRule::from_config));
        validator
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Run every rule to completion and aggregate the results in declaration order.
    ///
    /// Rules are layered by their prerequisites; the rules of a layer run
    /// concurrently, each in its own task under its own timeout. A rule runs once
    /// its prerequisites have results, passed or failed; it is skipped only when a
    /// prerequisite is undefined or was itself skipped. Cancellation fails the
    /// rules still running and skips the ones not started.
    pub async fn validate(
        &self,
        snapshot: Arc<ConfigSnapshot>,
        cancel: &CancellationToken,
    ) -> ValidationSummary {
        let started = Instant::now();
        let mut results: HashMap<String, ValidationResult> = HashMap::new();

        // The first declaration of an id wins; later duplicates fail outright
        let mut seen = HashSet::new();
        let mut duplicates = HashSet::new();
        let mut by_id: HashMap<&str, &ValidationRule> = HashMap::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if seen.insert(rule.id.as_str()) {
                by_id.insert(rule.id.as_str(), rule);
            } else {
                duplicates.insert(i);
            }
        }

        let graph: BTreeMap<String, Vec<String>> = by_id
            .iter()
            .map(|(id, rule)| (id.to_string(), rule.depends_on.clone()))
            .collect();
        let layering = layer_graph(&graph);

        for id in &layering.cyclic {
            if let Some(rule) = by_id.get(id.as_str()) {
                results.insert(
                    id.clone(),
                    ValidationResult::failed(
                        rule,
                        format!("rule is part of a dependency cycle ({})", layering.cyclic.join(" -> ")),
                        Duration::ZERO,
                    ),
                );
            }
        }

        for layer in &layering.layers {
            let mut runnable = Vec::new();
            for id in layer {
                let Some(rule) = by_id.get(id.as_str()) else {
                    continue;
                };
                match unmet_prerequisite(rule, &by_id, &results) {
                    Some(reason) => {
                        debug!("Skipping rule {}: {}", id, reason);
                        results.insert(id.clone(), ValidationResult::skipped(rule, reason));
                    }
                    None if cancel.is_cancelled() => {
                        results.insert(
                            id.clone(),
                            ValidationResult::skipped(rule, "validation cancelled".to_string()),
                        );
                    }
                    None => runnable.push(*rule),
                }
            }

            let layer_results = join_all(
                runnable
                    .into_iter()
                    .map(|rule| run_rule(rule, snapshot.clone(), self.default_timeout, cancel)),
            )
            .await;
            for result in layer_results {
                results.insert(result.rule_id.clone(), result);
            }
        }

        for id in &layering.blocked {
            if let Some(rule) = by_id.get(id.as_str()) {
                results.insert(
                    id.clone(),
                    ValidationResult::skipped(
                        rule,
                        "a prerequisite is part of a dependency cycle".to_string(),
                    ),
                );
            }
        }

        let ordered: Vec<ValidationResult> = self
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                if duplicates.contains(&i) {
                    return ValidationResult::failed(
                        rule,
                        format!("duplicate rule id '{}'", rule.id),
                        Duration::ZERO,
                    );
                }
                results.remove(&rule.id).unwrap_or_else(|| {
                    ValidationResult::skipped(rule, "rule was not evaluated".to_string())
                })
            })
            .collect();

        let summary = ValidationSummary::new(ordered);
        info!(
            "Validation finished in {:?}: {} rule(s), status {}",
            started.elapsed(),
            summary.results.len(),
            summary.status
        );
        summary
    }
}

fn unmet_prerequisite(
    rule: &ValidationRule,
    by_id: &HashMap<&str, &ValidationRule>,
    results: &HashMap<String, ValidationResult>,
) -> Option<String> {
    for dep in &rule.depends_on {
        if !by_id.contains_key(dep.as_str()) {
            return Some(format!("prerequisite '{}' is not defined", dep));
        }
        match results.get(dep) {
            Some(r) if r.outcome == Outcome::Skipped => {
                return Some(format!("prerequisite '{}' was skipped", dep));
            }
            Some(_) => {}
            None => return Some(format!("prerequisite '{}' has no result", dep)),
        }
    }
    None
}

/// Run one rule in its own task, bounded by its timeout.
async fn run_rule(
    rule: &ValidationRule,
    snapshot: Arc<ConfigSnapshot>,
    default_timeout: Duration,
    cancel: &CancellationToken,
) -> ValidationResult {
    let limit = rule.timeout.unwrap_or(default_timeout);
    let ctx = CheckContext {
        snapshot,
        timeout: limit,
    };
    let check = rule.check.clone();
    let started = Instant::now();

    let mut handle = tokio::spawn(async move { check.run(&ctx).await });

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            handle.abort();
            CheckOutcome::fail("validation cancelled before the check finished")
        }
        res = timeout(limit, &mut handle) => match res {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                warn!("Rule {} panicked: {}", rule.id, message);
                CheckOutcome::fail(format!("check panicked: {}", message))
            }
            Ok(Err(e)) => CheckOutcome::fail(format!("check task failed: {}", e)),
            Err(_) => {
                handle.abort();
                warn!("Rule {} timed out after {:?}", rule.id, limit);
                CheckOutcome::fail(format!("check timed out after {:?}", limit))
            }
        }
    };

    let elapsed = started.elapsed();
    match outcome {
        CheckOutcome::Pass(message) => ValidationResult::passed(rule, message, elapsed),
        CheckOutcome::Skip(reason) => {
            debug!("Rule {} does not apply: {}", rule.id, reason);
            let mut result = ValidationResult::skipped(rule, reason);
            result.elapsed = elapsed;
            result
        }
        CheckOutcome::Fail {
            message,
            remediation,
        } => {
            let mut result = ValidationResult::failed(rule, message, elapsed);
            if remediation.is_some() {
                result.remediation = remediation;
            }
            result
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests;
