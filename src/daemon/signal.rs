//! Process signals and the shutdown channel shared by the loop and the transport.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

/// Resolves once `true` is published. Never resolves if the sender is dropped without it.
pub async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
pub async fn termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("Failed to listen for Ctrl+C")?;
                info!("Shutdown signal received (Ctrl+C)");
            }
            _ = term.recv() => info!("Shutdown signal received (SIGTERM)"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
        info!("Shutdown signal received (Ctrl+C)");
    }

    Ok(())
}

#[cfg(unix)]
pub fn hangup() -> Result<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")
}
