use super::*;
use crate::backend::BackendError;
use crate::config::{ComposeConfig, StackConfig, StartSpec};
use crate::health::ProbeResult;
use crate::plan::{ServiceSpec, StopPolicy};
use crate::registry::{ComposeRecord, ProcessRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingBackend {
    stopped: Mutex<Vec<String>>,
    torn_down: Mutex<Vec<String>>,
    fail_stop: bool,
}

#[async_trait]
impl ServiceBackend for RecordingBackend {
    async fn start(
        &self,
        spec: &ServiceSpec,
        _snapshot: &ConfigSnapshot,
    ) -> std::result::Result<RecordHandle, BackendError> {
        Err(BackendError::Config {
            service: spec.name.clone(),
            message: "not used".to_string(),
        })
    }

    async fn probe(
        &self,
        _spec: &ServiceSpec,
        _handle: &RecordHandle,
        _snapshot: &ConfigSnapshot,
    ) -> ProbeResult {
        Ok("ok".to_string())
    }

    async fn stop(
        &self,
        record: &ProcessRecord,
        _snapshot: &ConfigSnapshot,
    ) -> std::result::Result<(), BackendError> {
        if self.fail_stop {
            return Err(BackendError::Command {
                service: record.service.clone(),
                command: "docker stop".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "daemon unreachable".to_string(),
            });
        }
        self.stopped.lock().push(record.service.clone());
        Ok(())
    }

    async fn teardown(
        &self,
        compose: &ComposeRecord,
        _snapshot: &ConfigSnapshot,
    ) -> std::result::Result<(), BackendError> {
        self.torn_down.lock().push(compose.project.clone());
        Ok(())
    }
}

fn setup(backend: Arc<RecordingBackend>) -> (TempDir, ShutdownCoordinator, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let mut stack = StackConfig::default();
    stack.compose = Some(ComposeConfig {
        file: PathBuf::from("docker-compose.yml"),
        project: "rag".to_string(),
    });
    let snapshot = ConfigSnapshot::from_parts(stack, temp_dir.path().to_path_buf(), BTreeMap::new());
    let registry_path = snapshot.registry_path();
    let coordinator = ShutdownCoordinator::new(backend, Arc::new(snapshot));
    (temp_dir, coordinator, registry_path)
}

fn stop_policy() -> StopPolicy {
    StopPolicy {
        signal: "SIGTERM".to_string(),
        grace_period: Duration::from_secs(2),
    }
}

fn managed(service: &str, stage: usize) -> ProcessRecord {
    ProcessRecord {
        service: service.to_string(),
        stage,
        handle: RecordHandle::Managed {
            label: format!("compose:rag/{}", service),
            start: StartSpec::Compose { service: None },
        },
        started_at: Utc::now(),
        port: None,
        stop: stop_policy(),
    }
}

#[tokio::test]
async fn test_shutdown_empty_registry_is_noop() {
    let (_dir, coordinator, path) = setup(Arc::new(RecordingBackend::default()));
    let mut registry = PidRegistry::open(&path).unwrap();

    let report = coordinator.shutdown(&mut registry).await.unwrap();
    assert!(report.is_noop());
    assert!(report.is_complete());
    assert!(!path.exists(), "no registry file should be created");
}

#[tokio::test]
async fn test_shutdown_twice_is_idempotent() {
    let backend = Arc::new(RecordingBackend::default());
    let (_dir, coordinator, path) = setup(backend.clone());
    let mut registry = PidRegistry::open(&path).unwrap();
    registry.insert(managed("qdrant", 1));
    registry.persist().unwrap();

    let first = coordinator.shutdown(&mut registry).await.unwrap();
    assert!(first.is_complete());
    assert!(first.registry_written);
    let written = std::fs::read_to_string(&path).unwrap();
    let modified = std::fs::metadata(&path).unwrap().modified().unwrap();

    let mut reloaded = PidRegistry::load(&path).unwrap();
    let second = coordinator.shutdown(&mut reloaded).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
    assert_eq!(*backend.stopped.lock(), vec!["qdrant".to_string()]);
}

#[tokio::test]
async fn test_managed_records_stop_in_reverse_stage_order() {
    let backend = Arc::new(RecordingBackend::default());
    let (_dir, coordinator, path) = setup(backend.clone());
    let mut registry = PidRegistry::open(&path).unwrap();
    registry.insert(managed("qdrant", 1));
    registry.insert(managed("api", 2));
    registry.insert(managed("ui", 3));

    let report = coordinator.shutdown(&mut registry).await.unwrap();
    let order: Vec<_> = report.services.iter().map(|s| s.service.as_str()).collect();
    assert_eq!(order, vec!["ui", "api", "qdrant"]);
    assert_eq!(*backend.stopped.lock(), vec!["ui", "api", "qdrant"]);
    assert!(registry.records().is_empty());
}

#[tokio::test]
async fn test_compose_torn_down_last() {
    let backend = Arc::new(RecordingBackend::default());
    let (dir, coordinator, path) = setup(backend.clone());
    let mut registry = PidRegistry::open(&path).unwrap();
    registry.insert(managed("qdrant", 1));
    registry.set_compose(Some(ComposeRecord {
        project: "rag".to_string(),
        file: dir.path().join("docker-compose.yml"),
    }));

    let report = coordinator.shutdown(&mut registry).await.unwrap();
    assert_eq!(
        report.compose,
        Some(ComposeTeardown {
            project: "rag".to_string(),
            error: None
        })
    );
    assert!(registry.compose().is_none());
    assert_eq!(*backend.torn_down.lock(), vec!["rag".to_string()]);
}

#[tokio::test]
async fn test_backend_failure_keeps_record() {
    let backend = Arc::new(RecordingBackend {
        fail_stop: true,
        ..Default::default()
    });
    let (_dir, coordinator, path) = setup(backend);
    let mut registry = PidRegistry::open(&path).unwrap();
    registry.insert(managed("neo4j", 1));

    let report = coordinator.shutdown(&mut registry).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.incomplete().len(), 1);
    assert!(matches!(
        report.services[0].outcome,
        StopOutcome::BackendFailed { .. }
    ));
    assert!(registry.get("neo4j").is_some());
}

#[tokio::test]
async fn test_stop_untracked_service() {
    let (_dir, coordinator, path) = setup(Arc::new(RecordingBackend::default()));
    let mut registry = PidRegistry::open(&path).unwrap();
    assert_eq!(
        coordinator.stop_service(&mut registry, "ghost").await,
        StopOutcome::NotTracked
    );
    assert!(!registry.is_dirty());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::process::{process_alive, read_fingerprint};
    use std::os::unix::process::CommandExt;

    fn spawn_sleep() -> std::process::Child {
        let mut cmd = std::process::Command::new("sleep");
        cmd.arg("30").process_group(0);
        cmd.spawn().unwrap()
    }

    fn process_record(service: &str, child: &std::process::Child) -> ProcessRecord {
        let fingerprint = read_fingerprint(child.id()).unwrap();
        ProcessRecord {
            service: service.to_string(),
            stage: 1,
            handle: RecordHandle::Process {
                pid: child.id(),
                fingerprint,
            },
            started_at: Utc::now(),
            port: None,
            stop: stop_policy(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_terminates_tracked_process() {
        let (_dir, coordinator, path) = setup(Arc::new(RecordingBackend::default()));
        let mut registry = PidRegistry::open(&path).unwrap();
        let mut child = spawn_sleep();
        registry.insert(process_record("api", &child));

        // Reap in the background so the exit is observable
        let pid = child.id();
        let reaper = std::thread::spawn(move || child.wait());

        let report = coordinator.shutdown(&mut registry).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.services[0].outcome, StopOutcome::Graceful);
        assert!(registry.records().is_empty());
        reaper.join().unwrap().unwrap();
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn test_reused_pid_is_never_signalled() {
        let (_dir, coordinator, path) = setup(Arc::new(RecordingBackend::default()));
        let mut registry = PidRegistry::open(&path).unwrap();
        let mut child = spawn_sleep();

        // Same PID, but the record was taken from a different process instance
        let mut record = process_record("api", &child);
        if let RecordHandle::Process { fingerprint, .. } = &mut record.handle {
            fingerprint.start_time += 3600;
        }
        registry.insert(record);

        let outcome = coordinator.stop_service(&mut registry, "api").await;
        assert_eq!(outcome, StopOutcome::PidReused { pid: child.id() });
        assert!(registry.get("api").is_none());
        assert!(process_alive(child.id()), "foreign process must survive");

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_exited_process_record_dropped() {
        let (_dir, coordinator, path) = setup(Arc::new(RecordingBackend::default()));
        let mut registry = PidRegistry::open(&path).unwrap();
        let mut child = spawn_sleep();
        let record = process_record("api", &child);
        child.kill().unwrap();
        child.wait().unwrap();
        registry.insert(record);

        let outcome = coordinator.stop_service(&mut registry, "api").await;
        assert_eq!(outcome, StopOutcome::AlreadyGone);
        assert!(registry.get("api").is_none());
    }
}
