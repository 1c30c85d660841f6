use super::*;
use crate::config::{EnvFileStatus, StackConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn snapshot_in(dir: &Path, yaml: &str, env: &[(&str, &str)]) -> Arc<ConfigSnapshot> {
    let env: BTreeMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let stack = StackConfig::parse(Path::new("stackup.yaml"), yaml, &env).unwrap();
    Arc::new(ConfigSnapshot::from_parts(stack, dir.to_path_buf(), env))
}

fn snapshot(yaml: &str, env: &[(&str, &str)]) -> Arc<ConfigSnapshot> {
    snapshot_in(Path::new("/tmp"), yaml, env)
}

fn pass_check() -> impl Check {
    check_fn(|_| futures::future::ready(CheckOutcome::pass("ok")))
}

fn fail_check() -> impl Check {
    check_fn(|_| futures::future::ready(CheckOutcome::fail("nope")))
}

async fn explode(_ctx: CheckContext) -> CheckOutcome {
    panic!("probe exploded")
}

fn rule(id: &str, severity: Severity, check: impl Check) -> ValidationRule {
    ValidationRule::new(id, Category::Env, severity, check)
}

const EMPTY: &str = "services: {}\n";

#[tokio::test]
async fn test_builtins_pass_for_valid_stack() {
    let yaml = r#"
services:
  db: { start: { type: script, run: "true" }, port: 5432 }
  api: { start: { type: script, run: "true" }, depends_on: [db], port: 8000 }
"#;
    let snap = snapshot(yaml, &[]);
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, GateStatus::Ok);
    assert_eq!(summary.results.len(), 4);
    assert!(summary.results.iter().all(|r| r.outcome == Outcome::Passed));
}

#[tokio::test]
async fn test_builtins_flag_structural_problems() {
    let yaml = r#"
services:
  Api: { start: { type: script, run: "true" }, port: 8000 }
  ui: { start: { type: script, run: "true" }, depends_on: [ghost], port: 8000 }
"#;
    let snap = snapshot(yaml, &[]);
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, GateStatus::Critical);
    assert!(summary.get("stack.service_names").unwrap().is_failure());
    assert!(summary.get("stack.dependencies").unwrap().is_failure());
    let ports = summary.get("stack.ports").unwrap();
    assert!(ports.is_failure());
    assert!(ports.message.contains("8000"));
    assert_eq!(summary.failure_count(Severity::Critical), 2);
    assert_eq!(summary.failure_count(Severity::Error), 1);
}

#[tokio::test]
async fn test_env_file_failure_is_error() {
    let stack = StackConfig::parse(Path::new("stackup.yaml"), EMPTY, &BTreeMap::new()).unwrap();
    let snap = Arc::new(
        ConfigSnapshot::from_parts(stack, PathBuf::from("/tmp"), BTreeMap::new()).with_env_file_status(
            EnvFileStatus::Failed {
                path: PathBuf::from("/tmp/.env"),
                message: "Environment file not found: /tmp/.env".to_string(),
            },
        ),
    );
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, GateStatus::Error);
    let result = summary.get("stack.env_file").unwrap();
    assert_eq!(result.remediation.as_deref(), Some("Create or fix /tmp/.env"));
    assert!(!summary.allows_start(false));
    assert!(summary.allows_start(true));
}

#[tokio::test]
async fn test_missing_credential_is_critical() {
    let yaml = r#"
validation:
  rules:
    - id: env.openai
      severity: critical
      check: { type: env_var, name: OPENAI_API_KEY }
      remediation: Add OPENAI_API_KEY to .env
    - id: env.home
      severity: warning
      check: { type: env_var, name: STACK_HOME }
services: {}
"#;
    let snap = snapshot(yaml, &[("STACK_HOME", "/srv/stack")]);
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.status, GateStatus::Critical);
    assert!(!summary.allows_start(true));
    let failed = summary.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].rule_id, "env.openai");
    assert_eq!(failed[0].category, Category::Env);
    assert_eq!(failed[0].remediation.as_deref(), Some("Add OPENAI_API_KEY to .env"));
    assert_eq!(summary.get("env.home").unwrap().outcome, Outcome::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_check_is_isolated() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule(
            "hangs",
            Severity::Error,
            check_fn(|_| std::future::pending::<CheckOutcome>()),
        ))
        .with_rule(rule("fine", Severity::Error, pass_check()))
        .with_rule(
            rule(
                "slow-but-ok",
                Severity::Warning,
                check_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    CheckOutcome::pass("done")
                }),
            )
            .timeout(Duration::from_secs(10)),
        );

    let start = Instant::now();
    let summary = validator.validate(snap, &CancellationToken::new()).await;

    // Concurrent within the layer: bounded by the largest timeout, not the sum
    assert!(start.elapsed() <= Duration::from_secs(5));
    let hung = summary.get("hangs").unwrap();
    assert!(hung.is_failure());
    assert!(hung.message.contains("timed out"));
    assert_eq!(summary.get("fine").unwrap().outcome, Outcome::Passed);
    assert_eq!(summary.get("slow-but-ok").unwrap().outcome, Outcome::Passed);
    assert_eq!(summary.status, GateStatus::Error);
}

#[tokio::test]
async fn test_panicking_check_fails_only_its_rule() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule("boom", Severity::Warning, check_fn(explode)))
        .with_rule(rule("fine", Severity::Critical, pass_check()));

    let summary = validator.validate(snap, &CancellationToken::new()).await;

    let boom = summary.get("boom").unwrap();
    assert!(boom.is_failure());
    assert!(boom.message.contains("probe exploded"), "{}", boom.message);
    assert_eq!(summary.get("fine").unwrap().outcome, Outcome::Passed);
    // A WARNING failure does not gate
    assert_eq!(summary.status, GateStatus::Ok);
}

#[tokio::test]
async fn test_dependent_rules_run_after_prerequisites_settle() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule("composite", Severity::Error, pass_check()).depends_on(&["base-ok", "base-bad"]))
        .with_rule(rule("base-ok", Severity::Info, pass_check()))
        .with_rule(rule("base-bad", Severity::Warning, fail_check()))
        .with_rule(rule("after-ok", Severity::Info, pass_check()).depends_on(&["base-ok"]))
        .with_rule(rule("orphan", Severity::Critical, fail_check()).depends_on(&["undefined"]))
        .with_rule(rule("after-orphan", Severity::Critical, fail_check()).depends_on(&["orphan"]));

    let summary = validator.validate(snap, &CancellationToken::new()).await;

    let ids: Vec<&str> = summary.results.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["composite", "base-ok", "base-bad", "after-ok", "orphan", "after-orphan"]
    );

    // A failed prerequisite still has a result, so the dependent is evaluated
    assert_eq!(summary.get("composite").unwrap().outcome, Outcome::Passed);
    assert_eq!(summary.get("after-ok").unwrap().outcome, Outcome::Passed);

    let orphan = summary.get("orphan").unwrap();
    assert_eq!(orphan.outcome, Outcome::Skipped);
    assert!(orphan.message.contains("not defined"));
    let after_orphan = summary.get("after-orphan").unwrap();
    assert_eq!(after_orphan.outcome, Outcome::Skipped);
    assert!(after_orphan.message.contains("skipped"));

    // Skipped rules never gate, whatever their severity
    assert_eq!(summary.status, GateStatus::Ok);
}

#[tokio::test]
async fn test_critical_dependent_of_failed_warning_still_gates() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule("neo4j.reachable", Severity::Warning, fail_check()))
        .with_rule(
            rule("neo4j.password", Severity::Critical, fail_check())
                .depends_on(&["neo4j.reachable"])
                .remediation("Set NEO4J_PASSWORD"),
        );

    let summary = validator.validate(snap, &CancellationToken::new()).await;

    let password = summary.get("neo4j.password").unwrap();
    assert_eq!(password.outcome, Outcome::Failed);
    assert_eq!(password.remediation.as_deref(), Some("Set NEO4J_PASSWORD"));
    assert_eq!(summary.status, GateStatus::Critical);
    assert!(!summary.allows_start(true));
}

#[tokio::test]
async fn test_rule_cycles_fail_and_block_dependents() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule("a", Severity::Warning, pass_check()).depends_on(&["b"]))
        .with_rule(rule("b", Severity::Warning, pass_check()).depends_on(&["a"]))
        .with_rule(rule("c", Severity::Critical, pass_check()).depends_on(&["a"]))
        .with_rule(rule("d", Severity::Info, pass_check()));

    let summary = validator.validate(snap, &CancellationToken::new()).await;

    assert!(summary.get("a").unwrap().message.contains("cycle"));
    assert!(summary.get("b").unwrap().is_failure());
    assert_eq!(summary.get("c").unwrap().outcome, Outcome::Skipped);
    assert_eq!(summary.get("d").unwrap().outcome, Outcome::Passed);
}

#[tokio::test]
async fn test_duplicate_rule_id_fails() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(5))
        .with_rule(rule("same", Severity::Info, pass_check()))
        .with_rule(rule("same", Severity::Error, pass_check()));

    let summary = validator.validate(snap, &CancellationToken::new()).await;
    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.results[0].outcome, Outcome::Passed);
    assert!(summary.results[1].message.contains("duplicate"));
    assert_eq!(summary.status, GateStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_fails_running_and_skips_pending() {
    let snap = snapshot(EMPTY, &[]);
    let validator = Validator::new(Duration::from_secs(60))
        .with_rule(rule(
            "slow",
            Severity::Warning,
            check_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                CheckOutcome::pass("done")
            }),
        ))
        .with_rule(rule("later", Severity::Info, pass_check()).depends_on(&["slow"]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let summary = validator.validate(snap, &cancel).await;
    assert!(summary.get("slow").unwrap().message.contains("cancelled"));
    assert_eq!(summary.get("later").unwrap().outcome, Outcome::Skipped);
}

#[tokio::test]
async fn test_env_and_security_checks() {
    let yaml = r#"
validation:
  rules:
    - id: env.port_format
      severity: error
      check: { type: env_var, name: API_PORT, pattern: "^[0-9]+$" }
    - id: env.bad_format
      severity: warning
      check: { type: env_var, name: MODE, pattern: "^(local|cloud)$" }
    - id: sec.placeholder
      severity: error
      check: { type: not_placeholder, name: NEO4J_PASSWORD }
    - id: cred.cloud
      severity: critical
      check: { type: credential_set, mode_var: MODE, mode: cloud, fields: [CLOUD_KEY, CLOUD_SECRET] }
    - id: cred.local
      severity: critical
      check: { type: credential_set, mode_var: MODE, mode: local, fields: [LOCAL_PATH] }
services: {}
"#;
    let snap = snapshot(
        yaml,
        &[
            ("API_PORT", "8000"),
            ("MODE", "cloud"),
            ("NEO4J_PASSWORD", "ChangeMe"),
            ("CLOUD_KEY", "k"),
        ],
    );
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.get("env.port_format").unwrap().outcome, Outcome::Passed);
    assert_eq!(summary.get("env.bad_format").unwrap().outcome, Outcome::Passed);

    let placeholder = summary.get("sec.placeholder").unwrap();
    assert!(placeholder.is_failure());
    assert!(!placeholder.message.contains("ChangeMe"), "secret leaked into message");

    let cloud = summary.get("cred.cloud").unwrap();
    assert!(cloud.is_failure());
    assert!(cloud.message.contains("CLOUD_SECRET"));
    assert_eq!(cloud.remediation.as_deref(), Some("Set CLOUD_SECRET in the env file"));

    let local = summary.get("cred.local").unwrap();
    assert_eq!(local.outcome, Outcome::Skipped);
    assert!(local.message.contains("not applicable"));
    assert_eq!(summary.status, GateStatus::Critical);
}

#[tokio::test]
async fn test_filesystem_checks() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir(temp_dir.path().join("data")).unwrap();
    std::fs::write(temp_dir.path().join("creds.json"), "{}").unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            temp_dir.path().join("creds.json"),
            std::fs::Permissions::from_mode(0o644),
        )
        .unwrap();
    }

    let yaml = r#"
validation:
  rules:
    - { id: file.data, severity: error, check: { type: file_exists, path: data, kind: dir } }
    - { id: file.data_is_file, severity: warning, check: { type: file_exists, path: data, kind: file } }
    - { id: file.missing, severity: error, check: { type: file_exists, path: nope.txt } }
    - { id: fs.writable, severity: error, check: { type: writable_dir, path: data } }
    - { id: sec.creds, severity: warning, check: { type: file_permissions, path: creds.json, max_mode: "600" } }
services: {}
"#;
    let snap = snapshot_in(temp_dir.path(), yaml, &[]);
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.get("file.data").unwrap().outcome, Outcome::Passed);
    assert!(summary.get("file.data_is_file").unwrap().is_failure());
    assert!(summary.get("file.missing").unwrap().is_failure());
    assert_eq!(summary.get("fs.writable").unwrap().outcome, Outcome::Passed);

    #[cfg(unix)]
    {
        let creds = summary.get("sec.creds").unwrap();
        assert!(creds.is_failure());
        assert!(creds.remediation.as_deref().unwrap().starts_with("chmod 600"));
    }
}

#[tokio::test]
async fn test_connectivity_checks() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().to_string();

    // Bind then drop to find a port nothing listens on
    let closed = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    };

    let yaml = format!(
        r#"
validation:
  rules:
    - {{ id: conn.open, severity: error, check: {{ type: tcp, address: "{}" }} }}
    - {{ id: conn.closed, severity: warning, timeout: 1s, check: {{ type: tcp, address: "{}" }} }}
services: {{}}
"#,
        open, closed
    );
    let snap = snapshot(&yaml, &[]);
    let start = std::time::Instant::now();
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    assert_eq!(summary.get("conn.open").unwrap().outcome, Outcome::Passed);
    let closed = summary.get("conn.closed").unwrap();
    assert!(closed.is_failure());
    assert!(closed.message.contains("attempts"), "{}", closed.message);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(summary.status, GateStatus::Ok);
}

#[test]
fn test_summary_json_shape() {
    let rule = ValidationRule::new("env.key", Category::Env, Severity::Critical, pass_check())
        .remediation("set it");
    let summary = ValidationSummary::new(vec![ValidationResult::failed(
        &rule,
        "KEY is not set".to_string(),
        Duration::from_millis(12),
    )]);

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["status"], "CRITICAL");
    assert_eq!(json["failures"]["critical"], 1);
    assert_eq!(json["results"][0]["outcome"], "failed");
    assert_eq!(json["results"][0]["elapsed_ms"], 12);
    assert_eq!(json["results"][0]["remediation"], "set it");
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_check_uses_snapshot_environment() {
    let yaml = r#"
validation:
  rules:
    - id: db.query
      severity: critical
      check: { type: command, command: ["sh", "-c", "test \"$DB_PASSWORD\" = from-env-file"] }
services: {}
"#;
    let snap = snapshot(
        yaml,
        &[("PATH", "/usr/bin:/bin"), ("DB_PASSWORD", "from-env-file")],
    );
    let summary = Validator::from_snapshot(&snap)
        .validate(snap.clone(), &CancellationToken::new())
        .await;

    let query = summary.get("db.query").unwrap();
    assert_eq!(query.outcome, Outcome::Passed, "{}", query.message);
    assert_eq!(summary.status, GateStatus::Ok);
}
