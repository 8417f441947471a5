//! The state store interface.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::namespace::Namespace;

/// Boxed future returned by every [`StateStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Closure deciding an [`StateStore::update`].
pub type UpdateFn<'a> = dyn FnMut(Option<&Value>) -> Mutation + Send + 'a;

/// What an [`StateStore::update`] closure wants done with the current value.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Leave the stored value as it is.
    Keep,
    /// Replace (or create) the stored value.
    Put(Value),
    /// Remove the key.
    Remove,
}

/// Namespaced key/value state shared by the ingestion path and background tasks.
///
/// Every method is atomic per key: [`update`](Self::update) runs its closure
/// while no other writer can touch the same key, and a write is only
/// reported as successful once the backend has made it durable. A write
/// touches only its own key.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be persisted.
    fn set<'a>(&'a self, namespace: Namespace, key: &'a str, value: Value) -> StoreFuture<'a, ()>;

    /// Removes `key`. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn delete<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, bool>;

    /// Returns every entry of a namespace, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan(&self, namespace: Namespace) -> StoreFuture<'_, Vec<(String, Value)>>;

    /// Atomic read-modify-write of a single key.
    ///
    /// `f` sees the current value (if any) and decides the [`Mutation`].
    /// Returns the value stored after the mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the mutation cannot be persisted; the stored value
    /// is then left unchanged.
    fn update<'a>(
        &'a self,
        namespace: Namespace,
        key: &'a str,
        f: &'a mut UpdateFn<'_>,
    ) -> StoreFuture<'a, Option<Value>>;

    /// Atomically increments the integer under `key` (missing counts as 0)
    /// and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidValue` if the stored value is not an
    /// integer, or a backend error if the write cannot be persisted.
    fn increment<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut rejected = None;
            let updated = self
                .update(namespace, key, &mut |current| match current {
                    None => Mutation::Put(Value::from(1_i64)),
                    Some(value) => match value.as_i64() {
                        Some(n) => Mutation::Put(Value::from(n.saturating_add(1))),
                        None => {
                            rejected = Some(value.to_string());
                            Mutation::Keep
                        }
                    },
                })
                .await?;

            if let Some(found) = rejected {
                return Err(StoreError::InvalidValue {
                    namespace,
                    key: key.to_string(),
                    reason: format!("expected an integer counter, found {found}"),
                });
            }

            updated
                .as_ref()
                .and_then(Value::as_i64)
                .ok_or_else(|| StoreError::InvalidValue {
                    namespace,
                    key: key.to_string(),
                    reason: "counter missing after increment".to_string(),
                })
        })
    }
}

/// Typed JSON helpers available on every [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Reads and decodes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the value does not decode as `T`.
    fn get_json<'a, T>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Box::pin(async move {
            self.get(namespace, key)
                .await?
                .map(serde_json::from_value)
                .transpose()
                .map_err(StoreError::from)
        })
    }

    /// Encodes `value` and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    fn set_json<'a, T>(
        &'a self,
        namespace: Namespace,
        key: &'a str,
        value: &T,
    ) -> StoreFuture<'a, ()>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_value(value);
        Box::pin(async move { self.set(namespace, key, encoded?).await })
    }

    /// Decodes every entry of a namespace, skipping entries that do not
    /// decode as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be read.
    fn scan_json<T>(&self, namespace: Namespace) -> StoreFuture<'_, Vec<(String, T)>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Box::pin(async move {
            let entries = self.scan(namespace).await?;
            let mut decoded = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                match serde_json::from_value(value) {
                    Ok(item) => decoded.push((key, item)),
                    Err(e) => {
                        tracing::warn!(
                            namespace = %namespace,
                            key = %key,
                            error = %e,
                            "skipping undecodable entry"
                        );
                    }
                }
            }
            Ok(decoded)
        })
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
