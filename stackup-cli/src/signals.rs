//! Termination signals for the foreground `up`.
//!
//! Unix: SIGINT, SIGTERM and SIGQUIT, with `ctrl_c` as a fallback.
//! Elsewhere only `ctrl_c` is awaited.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancel `token` on the first termination signal.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                debug!("Shutdown signal received");
                token.cancel();
            }
            Err(e) => warn!("Failed to install signal handlers: {}", e),
        }
    });
}
