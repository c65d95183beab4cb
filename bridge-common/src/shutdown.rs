//! Process shutdown signalling.

use tokio::sync::watch;
use tracing::info;

use crate::error::{Error, Result};

/// Wait for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| Error::Signal(format!("Failed to install SIGTERM handler: {}", e)))?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| Error::Signal(format!("Failed to listen for Ctrl+C: {}", e)))?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Signal(format!("Failed to listen for Ctrl+C: {}", e)))?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

/// Spawn a task that flips the returned receiver to `true` on the first signal.
///
/// If the signal handlers cannot be installed the error is logged and the
/// receiver is flipped immediately, so the bridge does not run unstoppable.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            tracing::error!(error = %e, "Signal handling unavailable");
        }
        let _ = tx.send(true);
    });

    rx
}
