//! Query execution against registered databases.
//!
//! The engine resolves a database through the registry, pushes the statement
//! down that database's serialized channel and shapes the outcome. Stats
//! refresh and status transitions happen here, off the response path.

mod executor;

pub(crate) use executor::Executor;

use crate::error::Result;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A single typed scalar in a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<rusqlite::types::ValueRef<'_>> for SqlValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// Result of one executed statement.
///
/// Row-producing statements carry columns and rows; mutating statements carry
/// `rows_affected` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

/// Executes SQL against databases resolved through the registry.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<Registry>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Run one statement against the named database.
    ///
    /// `database` may be a record id or a name. Statements targeting the same
    /// database execute in acceptance order; statements targeting different
    /// databases proceed in parallel.
    pub async fn execute(&self, database: &str, sql: &str) -> Result<QueryResult> {
        let handle = self.registry.resolve(database).await?;
        debug!("executing statement on database '{}'", handle.name);

        match handle.executor.execute(sql.to_string()).await {
            Ok(outcome) => {
                self.registry.mark_active(&handle.id).await;
                if outcome.mutated {
                    // Derived stats are recomputed off the hot path.
                    let registry = self.registry.clone();
                    let id = handle.id.clone();
                    tokio::spawn(async move {
                        let _ = registry.refresh_stats(&id).await;
                    });
                }
                Ok(outcome.result)
            }
            Err(err) => {
                if err.is_storage_fault() {
                    self.registry.mark_error(&handle.id).await;
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::BurrowError;
    use crate::registry::DatabaseStatus;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    async fn test_engine() -> (TempDir, Arc<Registry>, ExecutionEngine) {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(
            Registry::open(temp.path().to_path_buf(), EngineConfig::default())
                .await
                .unwrap(),
        );
        let engine = ExecutionEngine::new(registry.clone());
        (temp, registry, engine)
    }

    #[tokio::test]
    async fn test_scenario_create_insert_select() {
        let (_temp, registry, engine) = test_engine().await;
        let record = registry.create("myapp", "demo").await.unwrap();

        engine
            .execute("myapp", "CREATE TABLE users(id INTEGER, name TEXT)")
            .await
            .unwrap();
        let insert = engine
            .execute("myapp", "INSERT INTO users VALUES (1,'a')")
            .await
            .unwrap();
        assert_eq!(insert.rows_affected, Some(1));

        let select = engine.execute("myapp", "SELECT * FROM users").await.unwrap();
        assert_eq!(select.rows_affected, None);
        assert_eq!(
            select.rows,
            vec![vec![SqlValue::Integer(1), SqlValue::Text("a".into())]]
        );

        // Derived stats catch up after the writes.
        registry.refresh_stats(&record.id).await.unwrap();
        let refreshed = registry.get("myapp").await.unwrap();
        assert_eq!(refreshed.tables_count, 1);
        assert!(refreshed.size_bytes > 0);
        assert_eq!(refreshed.status, DatabaseStatus::Active);
    }

    #[tokio::test]
    async fn test_unknown_database_is_not_found() {
        let (_temp, _registry, engine) = test_engine().await;
        let err = engine.execute("nope", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, BurrowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_malformed_sql_leaves_state_unchanged() {
        let (_temp, registry, engine) = test_engine().await;
        registry.create("myapp", "demo").await.unwrap();

        let err = engine.execute("myapp", "SELEKT * FROM x").await.unwrap_err();
        assert!(matches!(err, BurrowError::Syntax { .. }));

        // Client mistakes never flip the database into Error status.
        let record = registry.get("myapp").await.unwrap();
        assert_eq!(record.status, DatabaseStatus::Active);
        assert_eq!(record.tables_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_distinct_databases_do_not_block_each_other() {
        let (_temp, registry, engine) = test_engine().await;
        registry.create("slow", "app-a").await.unwrap();
        registry.create("fast", "app-b").await.unwrap();

        let slow_engine = engine.clone();
        let slow = tokio::spawn(async move {
            let started = Instant::now();
            slow_engine
                .execute(
                    "slow",
                    "CREATE TABLE big AS \
                     WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x+1 FROM c WHERE x < 4000000) \
                     SELECT x FROM c",
                )
                .await
                .unwrap();
            started.elapsed()
        });

        // Give the slow write a head start, then write to the other database.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        engine
            .execute("fast", "CREATE TABLE t(id INTEGER)")
            .await
            .unwrap();
        let fast_elapsed = started.elapsed();

        let slow_elapsed = slow.await.unwrap();
        assert!(
            fast_elapsed < slow_elapsed,
            "write to 'fast' ({:?}) waited on 'slow' ({:?})",
            fast_elapsed,
            slow_elapsed
        );
    }
}
