//! Database registry: owns every managed database's metadata, backing file
//! and execution channel.
//!
//! The registry is the single owner of backing-store lifecycle. No other
//! component opens a database file directly; the engine reaches a database
//! only through a handle resolved here. The in-memory index is updated
//! atomically under one lock, so concurrent `list`/`resolve` callers never
//! observe a half-applied create or delete.

mod store;

use crate::config::EngineConfig;
use crate::engine::Executor;
use crate::error::{BurrowError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{MetaStore, StoredRecord};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle state of one managed database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseStatus {
    Active,
    Syncing,
    Offline,
    Error,
}

/// Metadata describing one logical database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: String,
    pub name: String,
    pub client_app: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub tables_count: usize,
    pub status: DatabaseStatus,
}

/// Resolved access to one database's execution channel.
#[derive(Clone)]
pub struct DatabaseHandle {
    pub id: String,
    pub name: String,
    pub(crate) executor: Arc<Executor>,
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct Entry {
    record: DatabaseRecord,
    path: PathBuf,
    executor: Option<Arc<Executor>>,
}

#[derive(Default)]
struct Index {
    /// Ids in insertion order; `list` iterates this.
    order: Vec<String>,
    entries: HashMap<String, Entry>,
}

impl Index {
    /// Find an id by record id or, failing that, by name in insertion order.
    fn find_id(&self, name_or_id: &str) -> Option<String> {
        if self.entries.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.order
            .iter()
            .find(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|e| e.record.name == name_or_id)
            })
            .cloned()
    }
}

/// The set of managed databases.
pub struct Registry {
    data_dir: PathBuf,
    store: MetaStore,
    config: EngineConfig,
    inner: RwLock<Index>,
}

impl Registry {
    /// Open the registry rooted at `data_dir`, reloading any databases
    /// persisted by a previous run.
    pub async fn open(data_dir: PathBuf, config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| BurrowError::io_with_path(e, &data_dir))?;

        let store = MetaStore::open(&data_dir)?;
        let mut index = Index::default();
        for stored in store.load_all()? {
            let path = data_dir.join(&stored.file_name);
            let (size_bytes, tables_count) = backing_stats(&path);
            let record = DatabaseRecord {
                id: stored.id.clone(),
                name: stored.name,
                client_app: stored.client_app,
                created_at: stored.created_at,
                size_bytes,
                tables_count,
                status: DatabaseStatus::Active,
            };
            index.order.push(stored.id.clone());
            index.entries.insert(
                stored.id,
                Entry {
                    record,
                    path,
                    executor: None,
                },
            );
        }

        if !index.order.is_empty() {
            info!("registry loaded {} database(s)", index.order.len());
        }

        Ok(Self {
            data_dir,
            store,
            config,
            inner: RwLock::new(index),
        })
    }

    /// Create a new database for a client app.
    ///
    /// Name uniqueness is scoped to the client app, so two apps can each own
    /// a database called "main" without colliding.
    pub async fn create(&self, name: &str, client_app: &str) -> Result<DatabaseRecord> {
        let sanitized = sanitize_name(name);
        if sanitized.is_empty() {
            return Err(BurrowError::InvalidName(name.to_string()));
        }

        let mut index = self.inner.write().await;
        let duplicate = index.order.iter().any(|id| {
            index
                .entries
                .get(id)
                .is_some_and(|e| e.record.name == name && e.record.client_app == client_app)
        });
        if duplicate {
            return Err(BurrowError::AlreadyExists {
                name: name.to_string(),
                client_app: client_app.to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        // The id suffix keeps files distinct when two client apps pick the
        // same database name.
        let file_name = format!("{}-{}.db", sanitized, &id[..8]);
        let path = self.data_dir.join(&file_name);

        create_backing_store(&path)?;

        let created_at = Utc::now();
        if let Err(e) = self.store.insert(&StoredRecord {
            id: id.clone(),
            name: name.to_string(),
            client_app: client_app.to_string(),
            created_at,
            file_name,
        }) {
            // Roll the orphaned file back so a failed create leaves nothing.
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        let record = DatabaseRecord {
            id: id.clone(),
            name: name.to_string(),
            client_app: client_app.to_string(),
            created_at,
            size_bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            tables_count: 0,
            status: DatabaseStatus::Active,
        };

        index.order.push(id.clone());
        index.entries.insert(
            id,
            Entry {
                record: record.clone(),
                path,
                executor: None,
            },
        );

        info!("created database '{}' for app '{}'", name, client_app);
        Ok(record)
    }

    /// Point-in-time snapshot of every record, in insertion order.
    pub async fn list(&self) -> Vec<DatabaseRecord> {
        let index = self.inner.read().await;
        index
            .order
            .iter()
            .filter_map(|id| index.entries.get(id).map(|e| e.record.clone()))
            .collect()
    }

    /// Number of managed databases.
    pub async fn count(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Look up a single record by name or id.
    pub async fn get(&self, name_or_id: &str) -> Result<DatabaseRecord> {
        let index = self.inner.read().await;
        index
            .find_id(name_or_id)
            .and_then(|id| index.entries.get(&id).map(|e| e.record.clone()))
            .ok_or_else(|| BurrowError::NotFound {
                database: name_or_id.to_string(),
            })
    }

    /// Resolve a database to an execution handle, spawning its serialized
    /// channel on first access. Never blocks on queries running against other
    /// databases.
    pub async fn resolve(&self, name_or_id: &str) -> Result<DatabaseHandle> {
        {
            let index = self.inner.read().await;
            if let Some(id) = index.find_id(name_or_id) {
                if let Some(entry) = index.entries.get(&id) {
                    if let Some(executor) = &entry.executor {
                        return Ok(DatabaseHandle {
                            id,
                            name: entry.record.name.clone(),
                            executor: executor.clone(),
                        });
                    }
                }
            } else {
                return Err(BurrowError::NotFound {
                    database: name_or_id.to_string(),
                });
            }
        }

        // First access: spawn the executor under the write lock so only one
        // channel ever exists per database.
        let mut index = self.inner.write().await;
        let id = index
            .find_id(name_or_id)
            .ok_or_else(|| BurrowError::NotFound {
                database: name_or_id.to_string(),
            })?;
        let (name, path, existing) = {
            let entry = index
                .entries
                .get(&id)
                .ok_or_else(|| BurrowError::NotFound {
                    database: name_or_id.to_string(),
                })?;
            (
                entry.record.name.clone(),
                entry.path.clone(),
                entry.executor.clone(),
            )
        };
        if let Some(executor) = existing {
            return Ok(DatabaseHandle { id, name, executor });
        }

        let executor = Arc::new(Executor::spawn(name.clone(), path, &self.config).await?);
        if let Some(entry) = index.entries.get_mut(&id) {
            entry.executor = Some(executor.clone());
        }
        Ok(DatabaseHandle { id, name, executor })
    }

    /// Recompute `size_bytes` and `tables_count` from the backing store.
    ///
    /// Stats are a pure function of current storage state; a failure to read
    /// them degrades the fields to zero rather than erroring.
    pub async fn refresh_stats(&self, id: &str) -> Result<DatabaseRecord> {
        let path = {
            let index = self.inner.read().await;
            index
                .entries
                .get(id)
                .map(|e| e.path.clone())
                .ok_or_else(|| BurrowError::NotFound {
                    database: id.to_string(),
                })?
        };

        let (size_bytes, tables_count) = backing_stats(&path);

        let mut index = self.inner.write().await;
        let entry = index
            .entries
            .get_mut(id)
            .ok_or_else(|| BurrowError::NotFound {
                database: id.to_string(),
            })?;
        entry.record.size_bytes = size_bytes;
        entry.record.tables_count = tables_count;
        Ok(entry.record.clone())
    }

    /// Delete a database: metadata, execution channel and backing file.
    ///
    /// Refuses with `Busy` while statements are queued or running so pending
    /// writes are never silently dropped.
    pub async fn delete(&self, name_or_id: &str) -> Result<()> {
        let (id, name, path, executor) = {
            let mut index = self.inner.write().await;
            let id = index
                .find_id(name_or_id)
                .ok_or_else(|| BurrowError::NotFound {
                    database: name_or_id.to_string(),
                })?;

            if let Some(entry) = index.entries.get(&id) {
                if entry
                    .executor
                    .as_ref()
                    .is_some_and(|ex| ex.in_flight() > 0)
                {
                    return Err(BurrowError::Busy {
                        database: entry.record.name.clone(),
                    });
                }
            }

            self.store.remove(&id)?;
            let Some(entry) = index.entries.remove(&id) else {
                return Err(BurrowError::NotFound {
                    database: name_or_id.to_string(),
                });
            };
            index.order.retain(|existing| existing != &id);
            (id, entry.record.name, entry.path, entry.executor)
        };

        // Close the worker's connection before unlinking the file.
        if let Some(executor) = executor {
            executor.close().await;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove backing file for '{}': {}", name, e);
            }
        }

        info!("deleted database '{}' ({})", name, id);
        Ok(())
    }

    /// Record a successful execution: a database in `Error` recovers to
    /// `Active` on its next success.
    pub async fn mark_active(&self, id: &str) {
        let mut index = self.inner.write().await;
        if let Some(entry) = index.entries.get_mut(id) {
            if entry.record.status != DatabaseStatus::Active {
                entry.record.status = DatabaseStatus::Active;
            }
        }
    }

    /// Record a storage fault against a database.
    pub async fn mark_error(&self, id: &str) {
        let mut index = self.inner.write().await;
        if let Some(entry) = index.entries.get_mut(id) {
            entry.record.status = DatabaseStatus::Error;
            warn!("database '{}' flagged with storage fault", entry.record.name);
        }
    }
}

/// Create an empty backing store with WAL enabled.
fn create_backing_store(path: &Path) -> Result<()> {
    let conn = Connection::open(path).map_err(|e| BurrowError::Database {
        message: format!("failed to create database file at {:?}: {}", path, e),
        source: Some(e),
    })?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(|e| BurrowError::Database {
            message: format!("failed to enable WAL: {}", e),
            source: Some(e),
        })?;
    Ok(())
}

/// Size and table count of a backing store. Unreadable stats degrade to zero.
fn backing_stats(path: &Path) -> (u64, usize) {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let tables_count = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .ok()
        .and_then(|conn| {
            conn.busy_timeout(Duration::from_millis(500)).ok()?;
            conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .ok()
        })
        .unwrap_or(0) as usize;
    (size_bytes, tables_count)
}

/// Reduce a database name to a filesystem-safe stem.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}
