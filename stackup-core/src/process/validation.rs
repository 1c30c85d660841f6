//! Liveness, fingerprint checks and signal delivery for tracked PIDs

use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::{Fingerprint, Liveness, parse_signal_name};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Read argv and start time of a live process in a single sysinfo refresh.
#[cfg(unix)]
pub fn read_fingerprint(pid: u32) -> Option<Fingerprint> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

    let mut sys = System::new();
    let sysinfo_pid = Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        false,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
    );
    let process = sys.process(sysinfo_pid)?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }
    let argv = process
        .cmd()
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    Some(Fingerprint {
        argv,
        start_time: process.start_time(),
    })
}

#[cfg(not(unix))]
pub fn read_fingerprint(_pid: u32) -> Option<Fingerprint> {
    None
}

/// Whether anything is running under `pid`. Zombies count as exited.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal 0 only checks for existence; EPERM means it exists but is not ours
        let exists = match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        };
        if !exists {
            trace!("Process {} does not exist", pid);
            return false;
        }
        // kill(0) succeeds on zombies; sysinfo sees their real state
        read_fingerprint(pid).is_some()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Compare a recorded fingerprint with whatever now runs under `pid`.
pub fn verify_fingerprint(pid: u32, expected: &Fingerprint) -> Liveness {
    if !process_alive(pid) {
        return Liveness::Gone;
    }
    match read_fingerprint(pid) {
        None => Liveness::Gone,
        Some(actual) if actual.matches(expected) => Liveness::Alive,
        Some(actual) => {
            debug!(
                "PID {} fingerprint mismatch: recorded '{}' @ {}, found '{}' @ {}",
                pid,
                expected.command_line(),
                expected.start_time,
                actual.command_line(),
                actual.start_time
            );
            Liveness::Reused
        }
    }
}

/// How a termination attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing was running when we got there.
    AlreadyGone,
    /// Exited within the grace period after the graceful signal.
    Graceful,
    /// Needed SIGKILL.
    Killed,
    /// Still alive after SIGKILL; exit could not be confirmed.
    Survived,
}

/// Stop a process we started: send `signal` to its process group, wait up to
/// `grace`, then SIGKILL the group and confirm the exit.
///
/// Callers must verify the fingerprint first; this function trusts the PID.
pub async fn terminate(pid: u32, signal: &str, grace: Duration) -> TerminateOutcome {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;

        if !process_alive(pid) {
            return TerminateOutcome::AlreadyGone;
        }

        let graceful = parse_signal_name(signal)
            .and_then(|num| Signal::try_from(num).ok())
            .unwrap_or_else(|| {
                warn!("Unknown stop signal '{}', using SIGTERM", signal);
                Signal::SIGTERM
            });

        info!("Sending {} to process group {}", graceful, pid);
        if !send_signal(pid, graceful) {
            return if process_alive(pid) {
                TerminateOutcome::Survived
            } else {
                TerminateOutcome::AlreadyGone
            };
        }

        if wait_for_exit(pid, grace).await {
            debug!("Process group {} terminated gracefully", pid);
            return TerminateOutcome::Graceful;
        }

        warn!(
            "Process group {} did not exit within {:?} after {}, sending SIGKILL",
            pid, grace, graceful
        );
        send_signal(pid, Signal::SIGKILL);

        if wait_for_exit(pid, KILL_CONFIRM_TIMEOUT).await {
            debug!("Process group {} killed with SIGKILL", pid);
            TerminateOutcome::Killed
        } else {
            error!("Process {} survived SIGKILL", pid);
            TerminateOutcome::Survived
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal, grace);
        warn!("terminate not supported on this platform");
        TerminateOutcome::Survived
    }
}

/// Signal the process group led by `pid`, falling back to the single process
/// when it does not lead a group.
#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);
    match killpg(nix_pid, signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) | Err(Errno::EPERM) => match kill(nix_pid, signal) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} to process {}: {}", signal, pid, e);
                false
            }
        },
        Err(e) => {
            warn!("Failed to send {} to process group {}: {}", signal, pid, e);
            false
        }
    }
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !process_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
