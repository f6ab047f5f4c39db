//! # Cross-platform OS signal handling.
//!
//! Provides [`wait_for_shutdown_signal`], awaited by
//! [`Supervisor::run_until_signal`](crate::Supervisor::run_until_signal) before it
//! stops every running process.
//!
//! ## Signals
//! **Unix platforms:**
//! - `SIGINT` (Ctrl-C in terminal)
//! - `SIGTERM` (default kill signal, used by systemd/Kubernetes)
//! - `SIGQUIT` (quit signal)
//!
//! **Windows platforms:**
//! - `Ctrl-C` via [`tokio::signal::ctrl_c`]

/// Waits for a termination signal.
///
/// Returns `Ok(())` when any signal is received, or `Err` if signal registration fails.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => tracing::info!("SIGINT received"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        _ = sigquit.recv() => tracing::info!("SIGQUIT received"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
