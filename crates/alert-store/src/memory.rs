//! In-process state store.

use std::collections::{BTreeMap, HashMap};
use std::future;

use parking_lot::RwLock;
use serde_json::Value;

use crate::namespace::Namespace;
use crate::traits::{Mutation, StateStore, StoreFuture, UpdateFn};

type Entries = HashMap<Namespace, BTreeMap<String, Value>>;

/// A [`StateStore`] held entirely in memory. State is lost on drop.
///
/// Every operation completes before its future is first polled.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<Entries>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in a namespace.
    #[must_use]
    pub fn len(&self, namespace: Namespace) -> usize {
        self.entries.read().get(&namespace).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if the namespace holds no keys.
    #[must_use]
    pub fn is_empty(&self, namespace: Namespace) -> bool {
        self.len(namespace) == 0
    }

    fn apply(&self, namespace: Namespace, key: &str, f: &mut UpdateFn<'_>) -> Option<Value> {
        let mut entries = self.entries.write();
        let ns = entries.entry(namespace).or_default();
        match f(ns.get(key)) {
            Mutation::Keep => ns.get(key).cloned(),
            Mutation::Put(value) => {
                ns.insert(key.to_string(), value.clone());
                Some(value)
            }
            Mutation::Remove => {
                ns.remove(key);
                None
            }
        }
    }
}

impl StateStore for MemoryStateStore {
    fn get<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        let value = self
            .entries
            .read()
            .get(&namespace)
            .and_then(|ns| ns.get(key))
            .cloned();
        Box::pin(future::ready(Ok(value)))
    }

    fn set<'a>(&'a self, namespace: Namespace, key: &'a str, value: Value) -> StoreFuture<'a, ()> {
        self.entries
            .write()
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
        Box::pin(future::ready(Ok(())))
    }

    fn delete<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, bool> {
        let removed = self
            .entries
            .write()
            .get_mut(&namespace)
            .is_some_and(|ns| ns.remove(key).is_some());
        Box::pin(future::ready(Ok(removed)))
    }

    fn scan(&self, namespace: Namespace) -> StoreFuture<'_, Vec<(String, Value)>> {
        let entries = self
            .entries
            .read()
            .get(&namespace)
            .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Box::pin(future::ready(Ok(entries)))
    }

    fn update<'a>(
        &'a self,
        namespace: Namespace,
        key: &'a str,
        f: &'a mut UpdateFn<'_>,
    ) -> StoreFuture<'a, Option<Value>> {
        let stored = self.apply(namespace, key, f);
        Box::pin(future::ready(Ok(stored)))
    }
}
