//! Port ownership: foreign holders, prior-run reclaim and declared conflicts

use stackup_core::{LaunchError, UpOptions};
use stackup_core::orchestrator::{OrchestratorError, RunStatus};
use stackup_core::ports::{PortStatus, check_port, port_in_use};
use stackup_core::state::ServiceState;
use stackup_core::validator::GateStatus;
use stackup_tests::{
    ScriptedBackend, TestServiceBuilder, TestStackBuilder, TestStackHarness, free_port,
    occupy_port,
};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn stack_with_port(port: u16) -> TestStackBuilder {
    TestStackBuilder::new()
        .with_timeout(Duration::from_secs(5))
        .add_service("qdrant", TestServiceBuilder::fake().with_port(port))
        .add_service("api", TestServiceBuilder::fake().depends_on(&["qdrant"]))
}

#[tokio::test]
async fn test_foreign_holder_is_a_conflict_and_left_alone() {
    let port = free_port();
    let foreign = occupy_port(port);
    let harness = TestStackHarness::new(stack_with_port(port), ScriptedBackend::new());

    let err = harness.up().await.unwrap_err();

    let LaunchError::Startup { result, .. } = err else {
        panic!("expected a startup failure, got {:?}", err);
    };
    let failed = result.failed.as_ref().unwrap();
    assert_eq!(
        failed.error,
        OrchestratorError::PortConflict {
            service: "qdrant".to_string(),
            port,
        }
    );
    assert!(!failed.error.remediation().is_empty());
    assert_eq!(result.services["qdrant"], ServiceState::Failed);
    assert!(harness.backend().events().is_empty());

    // The foreign listener still accepts connections
    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(b"ping").unwrap();
    let (_conn, _) = foreign.accept().unwrap();
}

#[tokio::test]
async fn test_optional_service_port_conflict_degrades() {
    let port = free_port();
    let _foreign = occupy_port(port);
    let builder = TestStackBuilder::new()
        .add_service("db", TestServiceBuilder::fake())
        .add_service("metrics", TestServiceBuilder::fake().with_port(port).optional());
    let harness = TestStackHarness::new(builder, ScriptedBackend::new());

    let report = harness.up().await.unwrap();

    assert_eq!(report.startup.status, RunStatus::Degraded);
    assert_eq!(report.startup.services["metrics"], ServiceState::Degraded);
    assert!(!harness.backend().started("metrics"));
    assert!(harness.backend().started("db"));
}

#[tokio::test]
async fn test_prior_run_port_is_reclaimed() {
    let port = free_port();
    let harness = TestStackHarness::new(stack_with_port(port), ScriptedBackend::new());
    harness.up().await.unwrap();
    assert!(port_in_use(port));
    assert!(matches!(
        check_port(port, &harness.registry()),
        PortStatus::OwnedByPriorRun(ref record) if record.service == "qdrant"
    ));
    harness.backend().clear_events();

    let report = harness
        .reopen()
        .up(UpOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.startup.status, RunStatus::Ready);
    let events = harness.backend().events();
    let stop = events.iter().position(|e| e == "stop:qdrant").unwrap();
    let start = events.iter().position(|e| e == "start:qdrant").unwrap();
    assert!(stop < start);
    assert!(harness.backend().holds_port("qdrant"));

    harness.down().await;
    assert!(!port_in_use(port));
}

#[tokio::test]
async fn test_down_releases_ports() {
    let port = free_port();
    let harness = TestStackHarness::new(stack_with_port(port), ScriptedBackend::new());
    harness.up().await.unwrap();

    harness.down().await;

    stackup_tests::wait_for_port_free(port, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(matches!(
        check_port(port, &harness.registry()),
        PortStatus::Free
    ));
}

#[tokio::test]
async fn test_duplicate_declared_ports_fail_validation() {
    let port = free_port();
    let builder = TestStackBuilder::new()
        .add_service("a", TestServiceBuilder::fake().with_port(port))
        .add_service("b", TestServiceBuilder::fake().with_port(port));
    let harness = TestStackHarness::new(builder, ScriptedBackend::new());

    let err = harness.up().await.unwrap_err();

    let LaunchError::Validation { summary } = err else {
        panic!("expected a validation failure, got {:?}", err);
    };
    assert_eq!(summary.status, GateStatus::Error);
    assert!(summary.get("stack.ports").unwrap().is_failure());
    assert!(harness.backend().events().is_empty());
}
