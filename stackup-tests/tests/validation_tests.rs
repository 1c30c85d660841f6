//! Validation gating through the stack facade

use stackup_core::config::{CheckSpec, ConfigSnapshot, Severity};
use stackup_core::validator::{GateStatus, Outcome};
use stackup_core::{LaunchError, Stack, UpOptions};
use stackup_tests::{ScriptedBackend, TestRuleBuilder, TestServiceBuilder, TestStackBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn load(dir: &TempDir, builder: TestStackBuilder) -> (Stack, Arc<ScriptedBackend>) {
    let path = builder.write_to_file(dir.path()).unwrap();
    let snapshot = ConfigSnapshot::load(&path, None).unwrap();
    let backend = Arc::new(ScriptedBackend::new());
    (Stack::new(snapshot, backend.clone()), backend)
}

#[tokio::test]
async fn test_missing_env_file_gates_up_at_error() {
    let dir = TempDir::new().unwrap();
    let builder = TestStackBuilder::new()
        .with_env_file(".env")
        .add_service("api", TestServiceBuilder::fake());
    let (stack, backend) = load(&dir, builder);

    let err = stack
        .up(UpOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    let LaunchError::Validation { summary } = err else {
        panic!("expected a validation failure, got {:?}", err);
    };
    assert_eq!(summary.status, GateStatus::Error);
    assert!(summary.get("stack.env_file").unwrap().is_failure());
    assert!(backend.events().is_empty());
}

#[tokio::test]
async fn test_ignore_errors_starts_anyway() {
    let dir = TempDir::new().unwrap();
    let builder = TestStackBuilder::new()
        .with_env_file(".env")
        .add_service("api", TestServiceBuilder::fake());
    let (stack, backend) = load(&dir, builder);

    let report = stack
        .up(
            UpOptions {
                ignore_errors: true,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.validation.status, GateStatus::Error);
    assert!(backend.started("api"));
    stack.down().await.unwrap();
}

#[tokio::test]
async fn test_env_file_values_reach_rules() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "STACKUP_TEST_QDRANT_URL=http://localhost:6333\n")
        .unwrap();
    let builder = TestStackBuilder::new()
        .with_env_file(".env")
        .add_rule(TestRuleBuilder::new(
            "env.qdrant_url",
            Severity::Critical,
            CheckSpec::EnvVar {
                name: "STACKUP_TEST_QDRANT_URL".to_string(),
                pattern: Some("^https?://".to_string()),
                non_empty: true,
            },
        ))
        .add_service("api", TestServiceBuilder::fake());
    let (stack, _backend) = load(&dir, builder);

    let summary = stack.validate(&CancellationToken::new()).await;

    assert_eq!(summary.status, GateStatus::Ok);
    assert_eq!(summary.get("env.qdrant_url").unwrap().outcome, Outcome::Passed);
}

#[tokio::test]
async fn test_hanging_check_is_bounded_by_its_timeout() {
    let dir = TempDir::new().unwrap();
    let builder = TestStackBuilder::new()
        .add_rule(
            TestRuleBuilder::command("net.slow", Severity::Error, &["sleep", "30"])
                .with_timeout(Duration::from_millis(500)),
        )
        .add_rule(TestRuleBuilder::env_var("env.path", Severity::Warning, "PATH"))
        .add_service("api", TestServiceBuilder::fake());
    let (stack, _backend) = load(&dir, builder);

    let started = Instant::now();
    let summary = stack.validate(&CancellationToken::new()).await;

    assert!(started.elapsed() < Duration::from_secs(10));
    let slow = summary.get("net.slow").unwrap();
    assert_eq!(slow.outcome, Outcome::Failed);
    assert!(slow.message.contains("timed out"), "{}", slow.message);
    // The hang does not hold back the other rules
    assert_eq!(summary.get("env.path").unwrap().outcome, Outcome::Passed);
    assert_eq!(summary.status, GateStatus::Error);
}

#[tokio::test]
async fn test_prerequisite_outcomes_and_json_shape() {
    let dir = TempDir::new().unwrap();
    let builder = TestStackBuilder::new()
        .add_rule(TestRuleBuilder::env_var(
            "env.api_key",
            Severity::Warning,
            "STACKUP_TEST_UNSET_KEY",
        ))
        .add_rule(
            TestRuleBuilder::command("auth.api_key", Severity::Error, &["false"])
                .depends_on(&["env.api_key"]),
        )
        .add_rule(
            TestRuleBuilder::command("auth.scopes", Severity::Critical, &["false"])
                .depends_on(&["auth.undeclared"]),
        )
        .add_service("api", TestServiceBuilder::fake());
    let (stack, _backend) = load(&dir, builder);

    let summary = stack.validate(&CancellationToken::new()).await;

    // A failed prerequisite does not hide its dependent from the gate
    assert_eq!(summary.get("auth.api_key").unwrap().outcome, Outcome::Failed);
    assert_eq!(summary.get("auth.scopes").unwrap().outcome, Outcome::Skipped);
    assert_eq!(summary.failure_count(Severity::Error), 1);
    assert_eq!(summary.failure_count(Severity::Warning), 1);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["status"], "ERROR");
    let results = json["results"].as_array().unwrap();
    let skipped = results
        .iter()
        .find(|r| r["rule_id"] == "auth.scopes")
        .unwrap();
    assert_eq!(skipped["outcome"], "skipped");
    assert_eq!(skipped["severity"], "critical");
    assert!(skipped["elapsed_ms"].is_u64());
}

#[tokio::test]
async fn test_cancelled_validation_blocks_start() {
    let dir = TempDir::new().unwrap();
    let builder = TestStackBuilder::new()
        .add_rule(TestRuleBuilder::command(
            "net.slow",
            Severity::Critical,
            &["sleep", "30"],
        ))
        .add_service("api", TestServiceBuilder::fake());
    let (stack, backend) = load(&dir, builder);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = stack.up(UpOptions::default(), &cancel).await.unwrap_err();

    assert!(matches!(err, LaunchError::Validation { .. }));
    assert!(backend.events().is_empty());
}
