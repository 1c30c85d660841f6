//! Check implementations: the stack file's check kinds and the built-in structural rules.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Check, CheckContext, CheckOutcome, ValidationRule};
use crate::config::{
    BodyPredicate, Category, CheckSpec, ConfigSnapshot, EnvFileStatus, PathKind, Severity,
    validate_service_name,
};
use crate::deps::start_levels;
use crate::health::{
    GateVerdict, ProbeFailure, ProbeResult, probe_command, probe_http, probe_tcp, wait_healthy,
};
use crate::retry::RetryPolicy;

const MIB: u64 = 1024 * 1024;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Adapter turning an async closure into a [`Check`].
pub struct CheckFn<F>(pub F);

/// Wrap an async closure as a check.
pub fn check_fn<F, Fut>(f: F) -> CheckFn<F>
where
    F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CheckOutcome> + Send + 'static,
{
    CheckFn(f)
}

#[async_trait]
impl<F, Fut> Check for CheckFn<F>
where
    F: Fn(CheckContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CheckOutcome> + Send + 'static,
{
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        (self.0)(ctx.clone()).await
    }
}

#[async_trait]
impl Check for CheckSpec {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let snapshot = &ctx.snapshot;
        match self {
            CheckSpec::EnvVar {
                name,
                pattern,
                non_empty,
            } => check_env_var(snapshot, name, pattern.as_deref(), *non_empty),
            CheckSpec::FileExists { path, kind } => {
                let path = snapshot.resolve_path(path);
                let kind = *kind;
                blocking(move || check_file_exists(&path, kind)).await
            }
            CheckSpec::WritableDir { path } => {
                let path = snapshot.resolve_path(path);
                blocking(move || check_writable_dir(&path)).await
            }
            CheckSpec::FreeDisk { path, min_mb } => {
                let path = snapshot.resolve_path(path);
                let min_mb = *min_mb;
                blocking(move || check_free_disk(&path, min_mb)).await
            }
            CheckSpec::MinMemory { min_mb } => {
                let min_mb = *min_mb;
                blocking(move || check_min_memory(min_mb)).await
            }
            CheckSpec::MinCpus { count } => {
                let count = *count;
                blocking(move || check_min_cpus(count)).await
            }
            CheckSpec::Tcp { address } => {
                let address = address.clone();
                retry_connectivity(ctx.timeout, move |_| {
                    let address = address.clone();
                    async move { probe_tcp(&address).await }
                })
                .await
            }
            CheckSpec::Http {
                url,
                expected_status,
                body,
            } => {
                let url = url.clone();
                let expected = *expected_status;
                let body: Option<BodyPredicate> = body.clone();
                retry_connectivity(ctx.timeout, move |attempt_timeout| {
                    let url = url.clone();
                    let body = body.clone();
                    async move { probe_http(&url, expected, body.as_ref(), attempt_timeout).await }
                })
                .await
            }
            CheckSpec::Command { command } => match probe_command(command, snapshot).await {
                Ok(observed) => CheckOutcome::pass(observed),
                Err(failure) => CheckOutcome::fail(failure.message),
            },
            CheckSpec::CredentialSet {
                mode_var,
                mode,
                fields,
            } => check_credential_set(snapshot, mode_var, mode, fields),
            CheckSpec::FilePermissions { path, max_mode } => {
                let path = snapshot.resolve_path(path);
                let max_mode = max_mode.clone();
                blocking(move || check_file_permissions(&path, &max_mode)).await
            }
            CheckSpec::NotPlaceholder { name, placeholders } => {
                check_not_placeholder(snapshot, name, placeholders)
            }
        }
    }
}

/// Run filesystem and sysinfo work off the async workers.
async fn blocking<F>(f: F) -> CheckOutcome
where
    F: FnOnce() -> CheckOutcome + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(outcome) => outcome,
        Err(e) => CheckOutcome::fail(format!("check task failed: {}", e)),
    }
}

/// Poll a connectivity probe inside the rule's budget, keeping a margin so the
/// last error is reported instead of a bare timeout.
async fn retry_connectivity<F, Fut>(rule_timeout: Duration, probe: F) -> CheckOutcome
where
    F: Fn(Duration) -> Fut,
    Fut: Future<Output = ProbeResult>,
{
    let budget = rule_timeout.mul_f64(0.8);
    let attempt_timeout = (rule_timeout / 2).min(MAX_ATTEMPT_TIMEOUT);
    let policy = RetryPolicy::fixed(CONNECT_RETRY_INTERVAL, budget);
    let cancel = CancellationToken::new();

    let verdict = wait_healthy("validation", &policy, &cancel, || {
        let attempt = probe(attempt_timeout);
        async move {
            match tokio::time::timeout(attempt_timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(ProbeFailure::transient(format!(
                    "no answer within {:?}",
                    attempt_timeout
                ))),
            }
        }
    })
    .await;

    match verdict {
        GateVerdict::Ready { attempts, .. } if attempts > 1 => {
            CheckOutcome::pass(format!("reachable after {} attempts", attempts))
        }
        GateVerdict::Ready { .. } => CheckOutcome::pass("reachable"),
        GateVerdict::TimedOut {
            attempts,
            last_error,
        } => CheckOutcome::fail(format!("{} (after {} attempts)", last_error, attempts)),
        GateVerdict::Failed { reason, .. } => CheckOutcome::fail(reason),
        GateVerdict::Cancelled => CheckOutcome::fail("cancelled"),
    }
}

fn check_env_var(
    snapshot: &ConfigSnapshot,
    name: &str,
    pattern: Option<&str>,
    non_empty: bool,
) -> CheckOutcome {
    let Some(value) = snapshot.env(name) else {
        return CheckOutcome::fail(format!("{} is not set", name));
    };
    if non_empty && value.trim().is_empty() {
        return CheckOutcome::fail(format!("{} is set but empty", name));
    }
    if let Some(pattern) = pattern {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => return CheckOutcome::fail(format!("invalid pattern '{}': {}", pattern, e)),
        };
        // The value may be a secret: never echo it
        if !re.is_match(value) {
            return CheckOutcome::fail(format!("{} does not match pattern '{}'", name, pattern));
        }
    }
    CheckOutcome::pass(format!("{} is set", name))
}

fn check_file_exists(path: &Path, kind: PathKind) -> CheckOutcome {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return CheckOutcome::fail(format!("{}: {}", path.display(), e)),
    };
    match kind {
        PathKind::File if !metadata.is_file() => {
            CheckOutcome::fail(format!("{} exists but is not a file", path.display()))
        }
        PathKind::Dir if !metadata.is_dir() => {
            CheckOutcome::fail(format!("{} exists but is not a directory", path.display()))
        }
        _ => CheckOutcome::pass(format!("{} exists", path.display())),
    }
}

fn check_writable_dir(path: &Path) -> CheckOutcome {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return CheckOutcome::fail(format!("{}: {}", path.display(), e)),
    };
    if !metadata.is_dir() {
        return CheckOutcome::fail(format!("{} is not a directory", path.display()));
    }
    if metadata.permissions().readonly() {
        return CheckOutcome::fail(format!("{} is read-only", path.display()));
    }

    #[cfg(unix)]
    {
        use nix::unistd::{AccessFlags, access};
        if let Err(e) = access(path, AccessFlags::W_OK) {
            return CheckOutcome::fail(format!("{} is not writable: {}", path.display(), e));
        }
    }

    CheckOutcome::pass(format!("{} is writable", path.display()))
}

fn check_free_disk(path: &Path, min_mb: u64) -> CheckOutcome {
    use sysinfo::Disks;

    let target = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(e) => return CheckOutcome::fail(format!("{}: {}", path.display(), e)),
    };

    // The disk holding `path` is the one with the longest matching mount point
    let disks = Disks::new_with_refreshed_list();
    let Some(disk) = disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
    else {
        return CheckOutcome::fail(format!("no mounted disk found for {}", target.display()));
    };

    let available_mb = disk.available_space() / MIB;
    if available_mb < min_mb {
        CheckOutcome::fail_with(
            format!(
                "{} MB available on {} (need {} MB)",
                available_mb,
                disk.mount_point().display(),
                min_mb
            ),
            format!("Free at least {} MB on {}", min_mb - available_mb, disk.mount_point().display()),
        )
    } else {
        CheckOutcome::pass(format!(
            "{} MB available on {}",
            available_mb,
            disk.mount_point().display()
        ))
    }
}

fn check_min_memory(min_mb: u64) -> CheckOutcome {
    use sysinfo::{MemoryRefreshKind, RefreshKind, System};

    let sys = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    let available_mb = sys.available_memory() / MIB;
    if available_mb < min_mb {
        CheckOutcome::fail(format!(
            "{} MB memory available (need {} MB)",
            available_mb, min_mb
        ))
    } else {
        CheckOutcome::pass(format!("{} MB memory available", available_mb))
    }
}

fn check_min_cpus(count: usize) -> CheckOutcome {
    use sysinfo::{CpuRefreshKind, RefreshKind, System};

    let sys = System::new_with_specifics(RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing()));
    let cpus = sys.cpus().len();
    if cpus < count {
        CheckOutcome::fail(format!("{} logical CPUs (need {})", cpus, count))
    } else {
        CheckOutcome::pass(format!("{} logical CPUs", cpus))
    }
}

fn check_credential_set(
    snapshot: &ConfigSnapshot,
    mode_var: &str,
    mode: &str,
    fields: &[String],
) -> CheckOutcome {
    let current = snapshot.env(mode_var).unwrap_or_default();
    if current != mode {
        return CheckOutcome::skip(format!("not applicable ({} is not '{}')", mode_var, mode));
    }

    let missing: Vec<&str> = fields
        .iter()
        .filter(|f| snapshot.env(f).is_none_or(|v| v.trim().is_empty()))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        CheckOutcome::pass(format!("all {} credential fields set", fields.len()))
    } else {
        CheckOutcome::fail_with(
            format!(
                "{}={} requires {} but {} missing",
                mode_var,
                mode,
                fields.join(", "),
                missing.join(", ")
            ),
            format!("Set {} in the env file", missing.join(", ")),
        )
    }
}

/// Parse an octal mode such as `600`, `0600` or `0o600`.
fn parse_octal_mode(s: &str) -> Option<u32> {
    let digits = s.trim().trim_start_matches("0o");
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}

fn check_file_permissions(path: &Path, max_mode: &str) -> CheckOutcome {
    let Some(max) = parse_octal_mode(max_mode) else {
        return CheckOutcome::fail(format!("invalid max_mode '{}'", max_mode));
    };

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CheckOutcome::pass(format!("{} does not exist", path.display()));
        }
        Err(e) => return CheckOutcome::fail(format!("{}: {}", path.display(), e)),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode() & 0o7777;
        let excess = mode & !max;
        if excess != 0 {
            return CheckOutcome::fail_with(
                format!(
                    "{} has mode {:o}, allowed at most {:o}",
                    path.display(),
                    mode,
                    max
                ),
                format!("chmod {:o} {}", mode & max, path.display()),
            );
        }
        CheckOutcome::pass(format!("{} has mode {:o}", path.display(), mode))
    }

    #[cfg(not(unix))]
    {
        let _ = (metadata, max);
        CheckOutcome::pass("file modes are not checked on this platform")
    }
}

fn check_not_placeholder(
    snapshot: &ConfigSnapshot,
    name: &str,
    placeholders: &[String],
) -> CheckOutcome {
    let Some(value) = snapshot.env(name) else {
        return CheckOutcome::pass(format!("{} is not set", name));
    };
    let normalized = value.trim().to_ascii_lowercase();
    if placeholders
        .iter()
        .any(|p| p.to_ascii_lowercase() == normalized)
    {
        CheckOutcome::fail_with(
            format!("{} still holds a placeholder value", name),
            format!("Replace the placeholder in {} with a real secret", name),
        )
    } else {
        CheckOutcome::pass(format!("{} is not a placeholder", name))
    }
}

// ============================================================================
// Built-in structural rules
// ============================================================================

struct ServiceNamesCheck;

#[async_trait]
impl Check for ServiceNamesCheck {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let problems: Vec<String> = ctx
            .snapshot
            .stack
            .service_names()
            .iter()
            .filter_map(|name| validate_service_name(name).err())
            .collect();
        if problems.is_empty() {
            CheckOutcome::pass(format!("{} service name(s) valid", ctx.snapshot.stack.services.len()))
        } else {
            CheckOutcome::fail(problems.join("; "))
        }
    }
}

struct DependenciesCheck;

#[async_trait]
impl Check for DependenciesCheck {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let graph: BTreeMap<String, Vec<String>> = ctx
            .snapshot
            .stack
            .services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.depends_on.clone()))
            .collect();
        match start_levels(&graph) {
            Ok(levels) => CheckOutcome::pass(format!("{} stage(s)", levels.len())),
            Err(e) => CheckOutcome::fail(e.to_string()),
        }
    }
}

struct PortsCheck;

#[async_trait]
impl Check for PortsCheck {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        let mut claims: HashMap<u16, Vec<String>> = HashMap::new();
        for name in ctx.snapshot.stack.service_names() {
            if let Some(port) = ctx.snapshot.stack.services[&name].port {
                claims.entry(port).or_default().push(name);
            }
        }
        let mut conflicts: Vec<String> = claims
            .into_iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(port, names)| format!("port {} declared by {}", port, names.join(", ")))
            .collect();
        conflicts.sort();
        if conflicts.is_empty() {
            CheckOutcome::pass("declared ports are unique")
        } else {
            CheckOutcome::fail(conflicts.join("; "))
        }
    }
}

struct EnvFileCheck;

#[async_trait]
impl Check for EnvFileCheck {
    async fn run(&self, ctx: &CheckContext) -> CheckOutcome {
        match ctx.snapshot.env_file_status() {
            EnvFileStatus::NotConfigured => CheckOutcome::pass("no env file configured"),
            EnvFileStatus::Loaded(path) => CheckOutcome::pass(format!("loaded {}", path.display())),
            EnvFileStatus::Failed { path, message } => CheckOutcome::fail_with(
                message.clone(),
                format!("Create or fix {}", path.display()),
            ),
        }
    }
}

/// Structural rules evaluated for every stack.
pub fn builtin_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("stack.service_names", Category::Stack, Severity::Critical, ServiceNamesCheck)
            .remediation("Rename services to lowercase letters, digits, '_' and '-'"),
        ValidationRule::new("stack.dependencies", Category::Stack, Severity::Critical, DependenciesCheck)
            .remediation("Fix depends_on so every dependency exists and there is no cycle"),
        ValidationRule::new("stack.ports", Category::Stack, Severity::Error, PortsCheck)
            .remediation("Give every service its own port"),
        ValidationRule::new("stack.env_file", Category::Stack, Severity::Error, EnvFileCheck),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_octal_mode() {
        assert_eq!(parse_octal_mode("600"), Some(0o600));
        assert_eq!(parse_octal_mode("0600"), Some(0o600));
        assert_eq!(parse_octal_mode("0o644"), Some(0o644));
        assert_eq!(parse_octal_mode("rw-"), None);
        assert_eq!(parse_octal_mode("999"), None);
        assert_eq!(parse_octal_mode(""), None);
    }
}
