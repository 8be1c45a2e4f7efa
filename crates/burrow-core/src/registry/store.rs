//! Persistent metadata store for the database registry.
//!
//! A single SQLite file (`metadata.db`) in the data directory records every
//! managed database so the registry survives server restarts. The store never
//! touches the managed database files themselves.

use crate::config::ServerConfig;
use crate::error::{BurrowError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// One persisted registry row.
#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub id: String,
    pub name: String,
    pub client_app: String,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
}

/// SQLite-backed registry metadata.
///
/// Thread-safe via an internal mutex on the connection; all operations are
/// short single-row statements.
pub(crate) struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    /// Open (or create) the metadata database inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(ServerConfig::METADATA_FILENAME);
        let conn = Connection::open(&path).map_err(|e| BurrowError::Database {
            message: format!("failed to open registry metadata: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| BurrowError::Database {
                message: format!("failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS databases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                client_app TEXT NOT NULL,
                created_at TEXT NOT NULL,
                file_name TEXT NOT NULL UNIQUE,
                UNIQUE (name, client_app)
            );
            "#,
        )
        .map_err(|e| BurrowError::Database {
            message: format!("failed to initialize registry schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| BurrowError::Database {
            message: format!("failed to lock metadata store: {}", e),
            source: None,
        })
    }

    /// Insert a new record. The registry checks name uniqueness under its own
    /// lock before calling this; the UNIQUE constraint is the backstop.
    pub fn insert(&self, record: &StoredRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO databases (id, name, client_app, created_at, file_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.name,
                record.client_app,
                record.created_at.to_rfc3339(),
                record.file_name,
            ],
        )
        .map_err(|e| BurrowError::Database {
            message: format!("failed to persist database record: {}", e),
            source: Some(e),
        })?;
        Ok(())
    }

    /// Remove a record by id. Returns whether a row was deleted.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM databases WHERE id = ?1", params![id])
            .map_err(|e| BurrowError::Database {
                message: format!("failed to delete database record: {}", e),
                source: Some(e),
            })?;
        Ok(deleted > 0)
    }

    /// Load every record in insertion order.
    pub fn load_all(&self) -> Result<Vec<StoredRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, client_app, created_at, file_name
                 FROM databases ORDER BY rowid ASC",
            )
            .map_err(|e| BurrowError::Database {
                message: format!("failed to prepare registry load: {}", e),
                source: Some(e),
            })?;

        let rows = stmt
            .query_map([], |row| {
                let created_at_str: String = row.get(3)?;
                Ok(StoredRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    client_app: row.get(2)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    file_name: row.get(4)?,
                })
            })
            .map_err(|e| BurrowError::Database {
                message: format!("failed to load registry records: {}", e),
                source: Some(e),
            })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| BurrowError::Database {
                message: format!("corrupt registry record: {}", e),
                source: Some(e),
            })?);
        }
        Ok(records)
    }
}
