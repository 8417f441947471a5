//! Alert routing daemon.
//!
//! Wires the [`alert_router`] core to the outside world:
//!
//! - [`config`]: TOML configuration
//! - [`logging`]: tracing subscriber setup
//! - [`transports`]: chat webhook and SMTP notifiers
//! - [`api`]: HTTP ingestion and administration endpoints
//! - [`server`]: listener and graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod transports;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use transports::DispatchNotifier;
