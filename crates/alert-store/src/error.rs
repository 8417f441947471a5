//! Error types for the alert-store crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::namespace::Namespace;

/// Errors that can occur while reading or writing durable state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating the state directory failed.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The database rejected a query or could not be reached.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The schema could not be applied.
    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored value has the wrong shape for the requested operation.
    #[error("invalid value at {namespace}/{key}: {reason}")]
    InvalidValue {
        /// Namespace holding the value.
        namespace: Namespace,
        /// Key of the value.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
