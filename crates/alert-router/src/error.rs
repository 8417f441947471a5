//! Error types for the alert-router crate.

use alert_store::StoreError;
use thiserror::Error;

/// Errors that can occur while routing alerts.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A silence or route definition was rejected.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the definition.
        reason: String,
    },

    /// A route's queue had no room for another alert.
    #[error("queue full for route {route}")]
    QueueFull {
        /// The route whose queue was full.
        route: String,
    },

    /// Sending a batch to a destination failed.
    #[error("delivery to {destination} failed: {reason}")]
    Delivery {
        /// The destination kind (`chat`, `email`, ...).
        destination: String,
        /// The transport error.
        reason: String,
    },

    /// The durable state store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Router configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Config {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Silence with the given ID was not found.
    #[error("silence not found: {id}")]
    SilenceNotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// The router has been shut down and accepts no more alerts.
    #[error("router is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
