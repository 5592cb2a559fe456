//! Graceful shutdown: resolves on SIGINT or SIGTERM and cancels a shared
//! [`CancellationToken`] so background tickers exit promptly alongside the
//! HTTP listener.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Waits for SIGINT or (on unix) SIGTERM, then cancels `token`. Intended
/// to be passed to `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    token.cancel();
}
