//! Error types for the daemon.

use std::net::SocketAddr;

use alert_router::RouterError;
use alert_store::StoreError;
use thiserror::Error;

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors raised while starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be read, parsed or validated.
    #[error("configuration error: {reason}")]
    Config {
        /// What was wrong.
        reason: String,
    },

    /// A transport could not be constructed.
    #[error("transport '{transport}' error: {reason}")]
    Transport {
        /// Transport kind.
        transport: &'static str,
        /// What failed.
        reason: String,
    },

    /// Logging could not be initialised.
    #[error("logging error: {0}")]
    Logging(String),

    /// Failed to bind the listen address.
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(std::io::Error),

    /// The state store failed to open.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The router rejected its settings.
    #[error(transparent)]
    Router(#[from] RouterError),
}
