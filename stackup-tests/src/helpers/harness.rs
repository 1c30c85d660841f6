//! A stack in a temporary directory wired to a scripted backend

use crate::helpers::fake_backend::ScriptedBackend;
use crate::helpers::stack_builder::TestStackBuilder;
use stackup_core::config::ConfigSnapshot;
use stackup_core::registry::PidRegistry;
use stackup_core::shutdown::ShutdownReport;
use stackup_core::{LaunchError, Stack, UpOptions, UpReport};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Owns the temp directory, so the state dir lives as long as the harness
pub struct TestStackHarness {
    temp_dir: TempDir,
    snapshot: Arc<ConfigSnapshot>,
    backend: Arc<ScriptedBackend>,
    stack: Stack,
}

impl TestStackHarness {
    pub fn new(builder: TestStackBuilder, backend: ScriptedBackend) -> Self {
        Self::with_env(builder, backend, &[])
    }

    /// Harness whose snapshot sees exactly `env`
    pub fn with_env(
        builder: TestStackBuilder,
        backend: ScriptedBackend,
        env: &[(&str, &str)],
    ) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let snapshot = builder.snapshot(temp_dir.path(), env);
        let backend = Arc::new(backend);
        let stack = Stack::new(snapshot.clone(), backend.clone());
        Self {
            temp_dir,
            snapshot,
            backend,
            stack,
        }
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn backend(&self) -> &Arc<ScriptedBackend> {
        &self.backend
    }

    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        &self.snapshot
    }

    /// A second `Stack` over the same state dir and backend, as a later invocation would see it
    pub fn reopen(&self) -> Stack {
        Stack::new(self.snapshot.clone(), self.backend.clone())
    }

    /// Read the persisted registry without touching it
    pub fn registry(&self) -> PidRegistry {
        PidRegistry::open(&self.snapshot.registry_path()).expect("open registry")
    }

    pub fn registry_exists(&self) -> bool {
        self.snapshot.registry_path().exists()
    }

    pub async fn up(&self) -> Result<UpReport, LaunchError> {
        self.stack
            .up(UpOptions::default(), &CancellationToken::new())
            .await
    }

    pub async fn up_ignoring_errors(&self) -> Result<UpReport, LaunchError> {
        self.stack
            .up(
                UpOptions {
                    ignore_errors: true,
                },
                &CancellationToken::new(),
            )
            .await
    }

    pub async fn down(&self) -> ShutdownReport {
        self.stack.down().await.expect("down")
    }
}
