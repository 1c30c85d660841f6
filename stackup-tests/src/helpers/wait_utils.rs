//! Async utilities to wait for processes and ports

use stackup_core::ports::port_in_use;
use stackup_core::process::process_alive;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Poll `condition` every 50ms until it holds or `timeout` passes
pub async fn wait_until<F>(mut condition: F, timeout: Duration) -> Result<(), WaitError>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        sleep(Duration::from_millis(50)).await;
    }

    if condition() {
        Ok(())
    } else {
        Err(WaitError::Timeout)
    }
}

/// Wait for a real process to exit (and be reaped)
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> Result<(), WaitError> {
    wait_until(|| !process_alive(pid), timeout).await
}

/// Wait until nothing listens on `port`
pub async fn wait_for_port_free(port: u16, timeout: Duration) -> Result<(), WaitError> {
    wait_until(|| !port_in_use(port), timeout).await
}
