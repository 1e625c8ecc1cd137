//! Termination signal handling.
//!
//! One awaitable future instead of a background listener task: `main`
//! awaits it directly between starting the server and draining it, and
//! gets back the name of whatever asked us to stop.

use tokio::signal;

/// Resolves when the process is asked to terminate and reports which
/// signal fired.
///
/// Ctrl+C is honored everywhere; on Unix a SIGTERM from the service
/// manager counts too, so `systemctl stop` drains peers the same way an
/// interactive interrupt does.
pub async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed");
        tokio::select! {
            _ = signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        "Ctrl+C"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn stays_pending_without_a_signal() {
        let result = timeout(Duration::from_millis(10), shutdown_signal()).await;
        assert!(result.is_err()); // nothing fired
    }
}
