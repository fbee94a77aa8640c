//! OS signal to cancellation token bridge

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves on the first of SIGINT, SIGTERM or SIGQUIT, returning its name.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let quit = unix_signal(signal::unix::SignalKind::quit(), "SIGQUIT");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
        _ = quit => "SIGQUIT",
    }
}

#[cfg(unix)]
async fn unix_signal(kind: signal::unix::SignalKind, name: &'static str) {
    match signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn cancel_on_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            name = shutdown_signal() => {
                info!(signal = name, "Received shutdown signal, finishing current job");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
