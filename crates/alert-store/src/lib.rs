//! Namespaced durable key/value state for the alert router.
//!
//! `alert-store` holds every piece of state the routing core shares across
//! ingestion paths and background tasks: silence records, dedupe timestamps,
//! rate-limit counters and dead-letter records. Each lives in its own
//! [`Namespace`].
//!
//! Two backends implement [`StateStore`]:
//!
//! - [`MemoryStateStore`]: process-local, for tests and ephemeral runs
//! - [`SqliteStateStore`]: one row per key in a SQLite database, so a write
//!   costs the same however much history the store holds
//!
//! # Example
//!
//! ```rust
//! use alert_store::{MemoryStateStore, Namespace, StateStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> alert_store::Result<()> {
//! let store = MemoryStateStore::new();
//! assert_eq!(store.increment(Namespace::Rate, "oncall:29000000").await?, 1);
//! assert_eq!(store.increment(Namespace::Rate, "oncall:29000000").await?, 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod namespace;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStateStore;
pub use namespace::Namespace;
pub use sqlite::SqliteStateStore;
pub use traits::{Mutation, StateStore, StateStoreExt, StoreFuture, UpdateFn};
