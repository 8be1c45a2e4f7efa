//! Per-database serialized execution channel.
//!
//! Each logical database gets one dedicated worker thread owning the rusqlite
//! connection, fed by a bounded mpsc queue. Statements against the same
//! database execute in acceptance order; statements against different
//! databases never share a queue. The queue bound plus a capped enqueue wait
//! turn unbounded contention into a `Busy` failure the client can retry.

use crate::config::EngineConfig;
use crate::engine::{QueryResult, SqlValue};
use crate::error::{BurrowError, Result};
use rusqlite::{Connection, InterruptHandle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Outcome of one statement, with the mutation flag the engine uses to
/// decide whether registry stats need a refresh.
#[derive(Debug)]
pub(crate) struct ExecOutcome {
    pub result: QueryResult,
    pub mutated: bool,
}

enum Job {
    Execute {
        job_id: u64,
        sql: String,
        reply: oneshot::Sender<Result<ExecOutcome>>,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to one database's execution channel.
pub(crate) struct Executor {
    label: String,
    tx: mpsc::Sender<Job>,
    interrupt: InterruptHandle,
    /// Jobs accepted but not yet completed. The registry refuses to delete a
    /// database while this is non-zero.
    pending: Arc<AtomicUsize>,
    next_job: AtomicU64,
    /// Id of the job the worker is executing right now (0 when idle). The
    /// worker transitions it under the mutex, so a caller holding the lock
    /// knows exactly whose statement an interrupt would hit.
    current: Arc<Mutex<u64>>,
    busy_wait: Duration,
    query_timeout: Duration,
}

impl Executor {
    /// Spawn the worker thread for the database at `path`.
    ///
    /// Fails if the backing store cannot be opened.
    pub async fn spawn(label: String, path: PathBuf, config: &EngineConfig) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>(config.max_queue_depth.max(1));
        let (setup_tx, setup_rx) = oneshot::channel::<Result<InterruptHandle>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(Mutex::new(0));

        let worker_pending = pending.clone();
        let worker_current = current.clone();
        let worker_label = label.clone();
        std::thread::Builder::new()
            .name(format!("burrow-db-{}", worker_label))
            .spawn(move || {
                worker_loop(
                    worker_label,
                    path,
                    rx,
                    setup_tx,
                    worker_pending,
                    worker_current,
                )
            })
            .map_err(|e| BurrowError::Io {
                message: format!("failed to spawn executor thread: {}", e),
                path: None,
                source: Some(e),
            })?;

        let interrupt = setup_rx.await.map_err(|_| BurrowError::Database {
            message: "executor worker exited during startup".into(),
            source: None,
        })??;

        Ok(Self {
            label,
            tx,
            interrupt,
            pending,
            next_job: AtomicU64::new(1),
            current,
            busy_wait: config.busy_wait,
            query_timeout: config.query_timeout,
        })
    }

    /// Run one statement through the channel.
    ///
    /// Waits up to the configured busy budget for a queue slot (`Busy` on
    /// expiry), then up to the query budget for the result (`Timeout` on
    /// expiry, with the running statement interrupted).
    pub async fn execute(&self, sql: String) -> Result<ExecOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job_id = self.next_job.fetch_add(1, Ordering::SeqCst);
        self.pending.fetch_add(1, Ordering::SeqCst);

        let send = self
            .tx
            .send_timeout(
                Job::Execute {
                    job_id,
                    sql,
                    reply: reply_tx,
                },
                self.busy_wait,
            )
            .await;
        if send.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BurrowError::Busy {
                database: self.label.clone(),
            });
        }

        match tokio::time::timeout(self.query_timeout, reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BurrowError::Database {
                message: format!("executor for '{}' exited unexpectedly", self.label),
                source: None,
            }),
            Err(_) => {
                // Interrupt only if our own statement holds the connection.
                // Holding the lock keeps the worker from moving on to the
                // next job until the interrupt has been delivered, so it
                // cannot land on someone else's statement. A job of ours
                // still sitting in the queue is skipped by the worker
                // instead of executed.
                if let Ok(current) = self.current.lock() {
                    if *current == job_id {
                        self.interrupt.interrupt();
                    }
                }
                Err(BurrowError::Timeout(self.query_timeout))
            }
        }
    }

    /// Number of accepted-but-unfinished statements.
    pub fn in_flight(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Close the worker's connection and wait for it to exit, so the backing
    /// file can be deleted safely.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Job::Close { ack: ack_tx }).await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(2), ack_rx).await;
        }
    }
}

fn worker_loop(
    label: String,
    path: PathBuf,
    mut rx: mpsc::Receiver<Job>,
    setup_tx: oneshot::Sender<Result<InterruptHandle>>,
    pending: Arc<AtomicUsize>,
    current: Arc<Mutex<u64>>,
) {
    let conn = match open_connection(&path) {
        Ok(conn) => {
            let _ = setup_tx.send(Ok(conn.get_interrupt_handle()));
            conn
        }
        Err(e) => {
            let _ = setup_tx.send(Err(e));
            return;
        }
    };

    debug!("executor for '{}' started", label);

    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Execute { job_id, sql, reply } => {
                if reply.is_closed() {
                    // Caller timed out or hung up while queued.
                    pending.fetch_sub(1, Ordering::SeqCst);
                    continue;
                }
                if let Ok(mut guard) = current.lock() {
                    *guard = job_id;
                }
                let outcome = run_statement(&conn, &sql);
                if let Ok(mut guard) = current.lock() {
                    *guard = 0;
                }
                pending.fetch_sub(1, Ordering::SeqCst);
                let _ = reply.send(outcome);
            }
            Job::Close { ack } => {
                drop(rx);
                drop(conn);
                let _ = ack.send(());
                debug!("executor for '{}' closed", label);
                return;
            }
        }
    }

    debug!("executor for '{}' stopped", label);
}

fn open_connection(path: &PathBuf) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| BurrowError::Database {
        message: format!("failed to open database at {:?}: {}", path, e),
        source: Some(e),
    })?;
    // WAL lets the registry introspect stats while the worker writes.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| BurrowError::Database {
            message: format!("failed to set pragmas: {}", e),
            source: Some(e),
        })?;
    Ok(conn)
}

/// Prepare and run one SQL statement, shaping the outcome by what the
/// statement actually is rather than by sniffing its text: anything that
/// produces columns streams rows, everything else reports affected rows.
fn run_statement(conn: &Connection, sql: &str) -> Result<ExecOutcome> {
    let mut stmt = conn.prepare(sql).map_err(map_engine_error)?;
    let mutated = !stmt.readonly();

    if stmt.column_count() > 0 {
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut out = Vec::new();
        let mut rows = stmt.query([]).map_err(map_engine_error)?;
        while let Some(row) = rows.next().map_err(map_engine_error)? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(SqlValue::from(row.get_ref(i).map_err(map_engine_error)?));
            }
            out.push(values);
        }

        Ok(ExecOutcome {
            result: QueryResult {
                columns,
                rows: out,
                rows_affected: None,
            },
            mutated,
        })
    } else {
        let affected = stmt.execute([]).map_err(map_engine_error)?;
        Ok(ExecOutcome {
            result: QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                rows_affected: Some(affected as u64),
            },
            mutated,
        })
    }
}

/// Translate rusqlite failures into the client-facing taxonomy. SQL mistakes
/// surface verbatim; anything unexplained is a storage fault.
fn map_engine_error(err: rusqlite::Error) -> BurrowError {
    match err {
        rusqlite::Error::SqlInputError { msg, offset, .. } => BurrowError::Syntax {
            message: msg,
            offset: (offset >= 0).then_some(offset as usize),
        },
        rusqlite::Error::SqliteFailure(code, message) => {
            use rusqlite::ErrorCode;
            let text = message
                .clone()
                .unwrap_or_else(|| code.to_string());
            match code.code {
                ErrorCode::ConstraintViolation => BurrowError::Constraint { message: text },
                ErrorCode::OperationInterrupted => {
                    // The caller already observed Timeout; this result is
                    // discarded, but classify it honestly for the log.
                    warn!("statement interrupted mid-execution");
                    BurrowError::Database {
                        message: text,
                        source: Some(rusqlite::Error::SqliteFailure(code, message)),
                    }
                }
                _ => BurrowError::Database {
                    message: text,
                    source: Some(rusqlite::Error::SqliteFailure(code, message)),
                },
            }
        }
        other => BurrowError::Database {
            message: other.to_string(),
            source: Some(other),
        },
    }
}
