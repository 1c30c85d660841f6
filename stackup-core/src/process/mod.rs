//! Process identity and termination
//!
//! This module provides:
//! - `Fingerprint` - command line plus start time, the identity of a tracked PID
//! - `read_fingerprint` / `verify_fingerprint` - PID-reuse detection
//! - `process_alive` - liveness check that treats zombies as exited
//! - `terminate` - graceful signal to the process group, escalating to SIGKILL

mod validation;

pub use validation::{
    TerminateOutcome, process_alive, read_fingerprint, terminate, verify_fingerprint,
};

use serde::{Deserialize, Serialize};

/// Tolerance when comparing recorded and observed start times, in seconds.
pub const START_TIME_TOLERANCE_SECS: u64 = 1;

/// What identifies a process beyond its PID.
///
/// A PID alone can be reused by an unrelated process after the original exits;
/// the argv and start time together cannot (within the tolerance).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Fingerprint {
    pub argv: Vec<String>,
    /// Process start time, seconds since the Unix epoch.
    pub start_time: u64,
}

impl Fingerprint {
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.argv == other.argv && self.start_time.abs_diff(other.start_time) <= START_TIME_TOLERANCE_SECS
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Verdict on a recorded PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Alive and the fingerprint matches: this is still our process.
    Alive,
    /// Nothing runs under that PID any more.
    Gone,
    /// Something runs under that PID, but it is not the process we started.
    Reused,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Alive => "alive",
            Liveness::Gone => "gone",
            Liveness::Reused => "pid reused",
        }
    }
}

/// Parse a signal name (`SIGTERM`, `TERM`, `sigterm`) or number into its value.
pub fn parse_signal_name(name: &str) -> Option<i32> {
    if let Ok(num) = name.parse::<i32>() {
        return (1..=64).contains(&num).then_some(num);
    }

    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    let num = match bare {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "KILL" => 9,
        "USR1" => 10,
        "USR2" => 12,
        "TERM" => 15,
        _ => return None,
    };
    Some(num)
}
