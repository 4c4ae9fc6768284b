//! OS signal handling.

/// Waits for SIGINT or SIGTERM and returns the signal's name.
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
