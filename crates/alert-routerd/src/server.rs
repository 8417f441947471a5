//! HTTP server with graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::api::{ApiState, create_router};
use crate::error::{DaemonError, DaemonResult};

/// Binds the listen address.
///
/// # Errors
///
/// Returns `DaemonError::BindFailed` if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> DaemonResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::BindFailed { addr, source })
}

/// Serves the API on `listener` until `shutdown` resolves, then waits for
/// in-flight requests to finish.
///
/// # Errors
///
/// Returns `DaemonError::Serve` if the server fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<ApiState>, shutdown: F) -> DaemonResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().map_err(DaemonError::Serve)?;
    let router = create_router(state);

    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(DaemonError::Serve)?;

    info!("HTTP API stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}
