//! SQLite-backed state store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::namespace::Namespace;
use crate::traits::{Mutation, StateStore, StoreFuture, UpdateFn};

/// SQL statements over the `state` table.
mod state_sql {
    /// Select one value
    pub const SELECT_VALUE: &str = "SELECT value FROM state WHERE namespace = ? AND key = ?";

    /// Insert or replace one value
    pub const UPSERT_VALUE: &str =
        "INSERT OR REPLACE INTO state (namespace, key, value) VALUES (?, ?, ?)";

    /// Delete one value
    pub const DELETE_VALUE: &str = "DELETE FROM state WHERE namespace = ? AND key = ?";

    /// Select a whole namespace in key order
    pub const SELECT_NAMESPACE: &str =
        "SELECT key, value FROM state WHERE namespace = ? ORDER BY key";
}

/// Connections kept open for concurrent readers.
const MAX_CONNECTIONS: u32 = 4;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn decode(row: &SqliteRow) -> Result<Value> {
    let text: String = row.try_get("value")?;
    Ok(serde_json::from_str(&text)?)
}

/// A [`StateStore`] keeping one row per key in a SQLite database.
///
/// Reads run concurrently. Writes go through a single in-process writer so
/// read-modify-write transactions never contend for the database lock, and
/// each write commits only the row it touches.
#[derive(Debug)]
pub struct SqliteStateStore {
    path: PathBuf,
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteStateStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema migration fails.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        debug!(path = %path.display(), "opening state database");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(path = %path.display(), "opened state store");
        Ok(Self {
            path,
            pool,
            writer: Mutex::new(()),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection. Later operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(path = %self.path.display(), "closed state store");
    }
}

impl StateStore for SqliteStateStore {
    fn get<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            sqlx::query(state_sql::SELECT_VALUE)
                .bind(namespace.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
                .as_ref()
                .map(decode)
                .transpose()
        })
    }

    fn set<'a>(&'a self, namespace: Namespace, key: &'a str, value: Value) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _writer = self.writer.lock().await;
            sqlx::query(state_sql::UPSERT_VALUE)
                .bind(namespace.as_str())
                .bind(key)
                .bind(value.to_string())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, namespace: Namespace, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let _writer = self.writer.lock().await;
            let result = sqlx::query(state_sql::DELETE_VALUE)
                .bind(namespace.as_str())
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn scan(&self, namespace: Namespace) -> StoreFuture<'_, Vec<(String, Value)>> {
        Box::pin(async move {
            let rows = sqlx::query(state_sql::SELECT_NAMESPACE)
                .bind(namespace.as_str())
                .fetch_all(&self.pool)
                .await?;
            rows.iter()
                .map(|row| -> Result<(String, Value)> {
                    Ok((row.try_get("key")?, decode(row)?))
                })
                .collect()
        })
    }

    fn update<'a>(
        &'a self,
        namespace: Namespace,
        key: &'a str,
        f: &'a mut UpdateFn<'_>,
    ) -> StoreFuture<'a, Option<Value>> {
        Box::pin(async move {
            let _writer = self.writer.lock().await;
            let mut tx = self.pool.begin().await?;

            let current = sqlx::query(state_sql::SELECT_VALUE)
                .bind(namespace.as_str())
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?
                .as_ref()
                .map(decode)
                .transpose()?;

            let stored = match f(current.as_ref()) {
                Mutation::Keep => return Ok(current),
                Mutation::Put(value) => {
                    sqlx::query(state_sql::UPSERT_VALUE)
                        .bind(namespace.as_str())
                        .bind(key)
                        .bind(value.to_string())
                        .execute(&mut *tx)
                        .await?;
                    Some(value)
                }
                Mutation::Remove => {
                    sqlx::query(state_sql::DELETE_VALUE)
                        .bind(namespace.as_str())
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                    None
                }
            };

            tx.commit().await?;
            Ok(stored)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    async fn open_in(dir: &tempfile::TempDir) -> SqliteStateStore {
        SqliteStateStore::open(dir.path().join("state.db"))
            .await
            .expect("open")
    }

    mod persistence_tests {
        use super::*;

        #[tokio::test]
        async fn state_survives_reopen() {
            let dir = tempfile::tempdir().expect("tempdir");
            {
                let store = open_in(&dir).await;
                store
                    .set(Namespace::Silence, "s1", json!({"label": "env"}))
                    .await
                    .expect("set");
                store.increment(Namespace::Rate, "oncall:7").await.expect("inc");
                store.increment(Namespace::Rate, "oncall:7").await.expect("inc");
                store.close().await;
            }

            let store = open_in(&dir).await;
            assert_eq!(
                store.get(Namespace::Silence, "s1").await.expect("get"),
                Some(json!({"label": "env"}))
            );
            assert_eq!(
                store.get(Namespace::Rate, "oncall:7").await.expect("get"),
                Some(json!(2))
            );
        }

        #[tokio::test]
        async fn delete_is_persisted() {
            let dir = tempfile::tempdir().expect("tempdir");
            {
                let store = open_in(&dir).await;
                store.set(Namespace::Dedupe, "fp", json!(100)).await.expect("set");
                assert!(store.delete(Namespace::Dedupe, "fp").await.expect("delete"));
                assert!(!store.delete(Namespace::Dedupe, "fp").await.expect("again"));
                store.close().await;
            }
            let store = open_in(&dir).await;
            assert_eq!(store.get(Namespace::Dedupe, "fp").await.expect("get"), None);
        }

        #[tokio::test]
        async fn open_creates_parent_directory() {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("nested").join("state.db");
            let store = SqliteStateStore::open(&path).await.expect("open");
            assert_eq!(store.path(), path.as_path());
            assert!(path.exists());
        }

        #[tokio::test]
        async fn scan_is_ordered_and_isolated() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_in(&dir).await;
            store.set(Namespace::Dlq, "0002", json!("b")).await.expect("set");
            store.set(Namespace::Dlq, "0001", json!("a")).await.expect("set");
            store.set(Namespace::Dedupe, "0000", json!(1)).await.expect("set");

            let entries = store.scan(Namespace::Dlq).await.expect("scan");
            assert_eq!(
                entries,
                vec![
                    ("0001".to_string(), json!("a")),
                    ("0002".to_string(), json!("b")),
                ]
            );
        }
    }

    mod update_tests {
        use super::*;
        use crate::traits::StateStoreExt;

        #[tokio::test]
        async fn update_keep_put_remove() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_in(&dir).await;

            let kept = store
                .update(Namespace::Dedupe, "fp", &mut |_| Mutation::Keep)
                .await
                .expect("keep");
            assert_eq!(kept, None);

            let put = store
                .update(Namespace::Dedupe, "fp", &mut |_| Mutation::Put(json!(5)))
                .await
                .expect("put");
            assert_eq!(put, Some(json!(5)));

            let removed = store
                .update(Namespace::Dedupe, "fp", &mut |current| {
                    assert_eq!(current, Some(&json!(5)));
                    Mutation::Remove
                })
                .await
                .expect("remove");
            assert_eq!(removed, None);
            assert_eq!(store.get(Namespace::Dedupe, "fp").await.expect("get"), None);
        }

        #[tokio::test]
        async fn increment_rejects_non_integer() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_in(&dir).await;
            store.set_json(Namespace::Rate, "r", "many").await.expect("set");

            let err = store
                .increment(Namespace::Rate, "r")
                .await
                .expect_err("must fail");
            assert!(matches!(err, StoreError::InvalidValue { .. }));
            assert_eq!(
                store.get(Namespace::Rate, "r").await.expect("get"),
                Some(json!("many"))
            );
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_increments_are_not_lost() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = Arc::new(open_in(&dir).await);
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    tokio::spawn(async move {
                        for _ in 0..25 {
                            store.increment(Namespace::Rate, "hot").await.expect("inc");
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.await.expect("join");
            }
            assert_eq!(
                store.get(Namespace::Rate, "hot").await.expect("get"),
                Some(json!(200))
            );
        }
    }

    mod growth_tests {
        use super::*;

        #[tokio::test]
        async fn point_lookups_use_the_primary_key() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_in(&dir).await;

            for statement in [state_sql::SELECT_VALUE, state_sql::DELETE_VALUE] {
                let plan: Vec<String> = sqlx::query(&format!("EXPLAIN QUERY PLAN {statement}"))
                    .bind("rate")
                    .bind("oncall:1")
                    .fetch_all(store.pool())
                    .await
                    .expect("plan")
                    .iter()
                    .map(|row| row.get::<String, _>("detail"))
                    .collect();
                assert!(
                    plan.iter().any(|detail| detail.contains("PRIMARY KEY")),
                    "{statement}: {plan:?}"
                );
            }
        }

        #[tokio::test]
        async fn many_buckets_stay_individually_addressable() {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_in(&dir).await;

            for bucket in 0..1000 {
                store
                    .increment(Namespace::Rate, &format!("oncall:{bucket}"))
                    .await
                    .expect("inc");
            }
            assert_eq!(
                store.increment(Namespace::Rate, "oncall:999").await.expect("inc"),
                2
            );

            let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM state WHERE namespace = ?")
                .bind("rate")
                .fetch_one(store.pool())
                .await
                .expect("count")
                .get("n");
            assert_eq!(count, 1000);
        }
    }
}
