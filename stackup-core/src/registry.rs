//! PID registry: the orchestrator's private, persisted record of what it started.
//!
//! The registry is the only source used to decide what may be stopped. Records
//! are keyed by service name and stored as an arena (`Vec`) with a name index
//! rebuilt on load. The file lives at `<state_dir>/registry.json` and is always
//! replaced atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::StartSpec;
use crate::errors::{Result, StackError};
use crate::plan::StopPolicy;
use crate::process::{Fingerprint, Liveness, verify_fingerprint};

const REGISTRY_VERSION: u32 = 1;

/// How a started service is identified for shutdown.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordHandle {
    /// A local process we spawned; it leads its own process group.
    Process { pid: u32, fingerprint: Fingerprint },
    /// Something a backend manages (container, script). Stopped through the backend.
    Managed { label: String, start: StartSpec },
}

impl RecordHandle {
    pub fn pid(&self) -> Option<u32> {
        match self {
            RecordHandle::Process { pid, .. } => Some(*pid),
            RecordHandle::Managed { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RecordHandle::Process { pid, .. } => format!("pid {}", pid),
            RecordHandle::Managed { label, .. } => label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessRecord {
    pub service: String,
    pub stage: usize,
    pub handle: RecordHandle,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub stop: StopPolicy,
}

impl ProcessRecord {
    /// Current verdict for this record. Managed handles are reported alive;
    /// their backend owns the truth.
    pub fn liveness(&self) -> Liveness {
        match &self.handle {
            RecordHandle::Process { pid, fingerprint } => verify_fingerprint(*pid, fingerprint),
            RecordHandle::Managed { .. } => Liveness::Alive,
        }
    }
}

/// The compose project a run brought up; torn down last on shutdown.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ComposeRecord {
    pub project: String,
    pub file: PathBuf,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RegistryFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compose: Option<ComposeRecord>,
    #[serde(default)]
    records: Vec<ProcessRecord>,
}

#[derive(Debug)]
pub struct PidRegistry {
    path: PathBuf,
    file: RegistryFile,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl PidRegistry {
    /// Read the registry as stored, without checking any process.
    ///
    /// A missing file is an empty registry. An unreadable or corrupt file is an
    /// error: silently dropping it would orphan every process it tracked.
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| StackError::Registry {
                path: path.to_path_buf(),
                message: format!("failed to read: {}", e),
            })?;
            let parsed: RegistryFile =
                serde_json::from_str(&content).map_err(|e| StackError::Registry {
                    path: path.to_path_buf(),
                    message: format!("failed to parse: {}", e),
                })?;
            if parsed.version != REGISTRY_VERSION {
                return Err(StackError::Registry {
                    path: path.to_path_buf(),
                    message: format!("unsupported registry version {}", parsed.version),
                });
            }
            debug!("Loaded {} registry records from {:?}", parsed.records.len(), path);
            parsed
        } else {
            RegistryFile {
                version: REGISTRY_VERSION,
                ..Default::default()
            }
        };

        let mut registry = Self {
            path: path.to_path_buf(),
            file,
            index: HashMap::new(),
            dirty: false,
        };
        registry.reindex();
        Ok(registry)
    }

    /// Open the registry and prune records whose processes are confirmed gone.
    pub fn load(path: &Path) -> Result<Self> {
        let mut registry = Self::open(path)?;
        let pruned = registry.prune_dead();
        if !pruned.is_empty() {
            info!(
                "Pruned {} stale registry record(s): {}",
                pruned.len(),
                pruned.iter().map(|r| r.service.as_str()).collect::<Vec<_>>().join(", ")
            );
        }
        Ok(registry)
    }

    /// Drop process records whose PID is gone or now belongs to something else.
    pub fn prune_dead(&mut self) -> Vec<ProcessRecord> {
        let (keep, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut self.file.records)
            .into_iter()
            .partition(|r| r.liveness() == Liveness::Alive);
        self.file.records = keep;
        if !dead.is_empty() {
            self.dirty = true;
            self.reindex();
        }
        dead
    }

    fn reindex(&mut self) {
        self.index = self
            .file
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.service.clone(), i))
            .collect();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.file.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.records.is_empty() && self.file.compose.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.file.records
    }

    pub fn get(&self, service: &str) -> Option<&ProcessRecord> {
        self.index.get(service).map(|&i| &self.file.records[i])
    }

    /// The record claiming `port`, if any.
    pub fn by_port(&self, port: u16) -> Option<&ProcessRecord> {
        self.file.records.iter().find(|r| r.port == Some(port))
    }

    /// Insert or replace the record for `record.service`.
    pub fn insert(&mut self, record: ProcessRecord) {
        match self.index.get(&record.service) {
            Some(&i) => self.file.records[i] = record,
            None => {
                self.index.insert(record.service.clone(), self.file.records.len());
                self.file.records.push(record);
            }
        }
        self.dirty = true;
    }

    pub fn remove(&mut self, service: &str) -> Option<ProcessRecord> {
        let i = self.index.remove(service)?;
        let record = self.file.records.remove(i);
        self.reindex();
        self.dirty = true;
        Some(record)
    }

    pub fn compose(&self) -> Option<&ComposeRecord> {
        self.file.compose.as_ref()
    }

    pub fn set_compose(&mut self, compose: Option<ComposeRecord>) {
        if self.file.compose != compose {
            self.file.compose = compose;
            self.dirty = true;
        }
    }

    /// Service names in stop order: highest stage first, latest start first within a stage.
    pub fn shutdown_order(&self) -> Vec<String> {
        let mut records: Vec<&ProcessRecord> = self.file.records.iter().collect();
        records.sort_by(|a, b| {
            b.stage
                .cmp(&a.stage)
                .then_with(|| b.started_at.cmp(&a.started_at))
                .then_with(|| a.service.cmp(&b.service))
        });
        records.into_iter().map(|r| r.service.clone()).collect()
    }

    /// Write the registry if anything changed since the last write.
    ///
    /// Returns whether the file was written.
    pub fn persist(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let content = serde_json::to_string_pretty(&self.file).map_err(|e| StackError::Registry {
            path: self.path.clone(),
            message: format!("failed to serialize: {}", e),
        })?;
        write_secure_file(&self.path, content.as_bytes())?;
        self.dirty = false;
        debug!("Saved registry ({} records) to {:?}", self.len(), self.path);
        Ok(true)
    }
}

/// Write a file atomically with owner-only permissions (0o600 on Unix).
fn write_secure_file(path: &Path, content: &[u8]) -> Result<()> {
    let registry_err = |message: String| StackError::Registry {
        path: path.to_path_buf(),
        message,
    };

    let parent = path
        .parent()
        .ok_or_else(|| registry_err("no parent directory".to_string()))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| registry_err(format!("failed to create '{}': {}", parent.display(), e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| registry_err(format!("failed to create temp file: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| registry_err(format!("failed to set permissions: {}", e)))?;
    }

    tmp.write_all(content)
        .map_err(|e| registry_err(format!("failed to write temp file: {}", e)))?;

    tmp.persist(path).map_err(|e| {
        warn!("Failed to persist registry: {}", e);
        registry_err(format!("failed to persist: {}", e))
    })?;

    Ok(())
}
