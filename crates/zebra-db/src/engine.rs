use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use zebra_common::{Error, Result};
use zebra_config::{ExecutionStrategy, StorageConfig};

use crate::schema;
use crate::value::{Rows, SqlValue};

/// Uniform statement execution, whichever side of the process owns the connection.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The concrete strategy in use. Never `Auto`.
    fn strategy(&self) -> ExecutionStrategy;

    /// Run one statement and return its rows. Statements without result columns
    /// return an empty set.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows>;

    /// Run a multi-statement script, discarding any rows.
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Roll back an open transaction without waiting for the outcome. Used when a
    /// transaction is abandoned mid-flight.
    fn abort_transaction(&self);
}

/// Connection guarded by a mutex and driven on the caller's thread.
pub struct InProcessBackend {
    conn: Mutex<Connection>,
}

impl InProcessBackend {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }
}

#[async_trait]
impl StorageBackend for InProcessBackend {
    fn strategy(&self) -> ExecutionStrategy {
        ExecutionStrategy::InProcess
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        let conn = self.connection()?;
        run_statement(&conn, sql, &params)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| sqlite_error("batch failed", e))
    }

    fn abort_transaction(&self) {
        if let Ok(conn) = self.conn.lock() {
            rollback_if_open(&conn);
        }
    }
}

enum Command {
    Execute {
        sql: String,
        params: Vec<SqlValue>,
        reply: oneshot::Sender<Result<Rows>>,
    },
    Batch {
        sql: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Abort,
}

/// Connection owned by a dedicated thread; callers exchange messages with it and
/// await the reply with a deadline.
pub struct WorkerBackend {
    commands: mpsc::UnboundedSender<Command>,
    timeout: Duration,
}

impl WorkerBackend {
    pub fn spawn(conn: Connection, timeout: Duration) -> Result<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("zebra-sqlite".into())
            .spawn(move || worker_loop(conn, receiver))
            .map_err(|e| Error::Initialization(format!("failed to start storage worker: {e}")))?;

        Ok(Self { commands, timeout })
    }

    async fn round_trip<T>(
        &self,
        what: &str,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::Database("storage worker has stopped".into()))?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Database("storage worker dropped the reply".into())),
            Err(_) => Err(Error::Timeout(format!(
                "{what} did not complete within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for WorkerBackend {
    fn strategy(&self) -> ExecutionStrategy {
        ExecutionStrategy::Worker
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        self.round_trip("statement", |reply| Command::Execute {
            sql: sql.to_string(),
            params,
            reply,
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.round_trip("batch", |reply| Command::Batch {
            sql: sql.to_string(),
            reply,
        })
        .await
    }

    fn abort_transaction(&self) {
        let _ = self.commands.send(Command::Abort);
    }
}

fn worker_loop(conn: Connection, mut receiver: mpsc::UnboundedReceiver<Command>) {
    debug!("storage worker started");
    while let Some(command) = receiver.blocking_recv() {
        match command {
            Command::Execute { sql, params, reply } => {
                let _ = reply.send(run_statement(&conn, &sql, &params));
            }
            Command::Batch { sql, reply } => {
                let result = conn
                    .execute_batch(&sql)
                    .map_err(|e| sqlite_error("batch failed", e));
                let _ = reply.send(result);
            }
            Command::Abort => rollback_if_open(&conn),
        }
    }
    debug!("storage worker stopped");
}

fn rollback_if_open(conn: &Connection) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!("failed to roll back abandoned transaction: {e}");
        }
    }
}

fn run_statement(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Rows> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| sqlite_error("failed to prepare statement", e))?;
    let columns = stmt.column_count();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| sqlite_error("failed to execute statement", e))?;

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| sqlite_error("failed to step statement", e))?
    {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            let value: rusqlite::types::Value = row
                .get(idx)
                .map_err(|e| sqlite_error("failed to read column", e))?;
            values.push(value.into());
        }
        out.push(values);
    }

    Ok(out)
}

/// Classify a rusqlite failure into the storage error taxonomy.
pub(crate) fn sqlite_error(context: &str, e: rusqlite::Error) -> Error {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            let detail = match &e {
                rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
                _ => e.to_string(),
            };
            return Error::Constraint(detail);
        }
        // SQLITE_ERROR: syntax errors, unknown tables/columns, bad MATCH expressions
        Some(ErrorCode::Unknown) => return Error::Query(format!("{context}: {e}")),
        _ => {}
    }

    match &e {
        rusqlite::Error::InvalidParameterCount(..)
        | rusqlite::Error::InvalidParameterName(_)
        | rusqlite::Error::MultipleStatement
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnName(_) => Error::Query(format!("{context}: {e}")),
        _ => Error::Database(format!("{context}: {e}")),
    }
}

/// Process-wide database: one connection behind the chosen backend plus a gate
/// serializing top-level statements against running transactions.
pub struct Database {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) gate: tokio::sync::Mutex<()>,
    location: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if needed) the database described by `config` and provision
    /// the schema. Every failure is reported as `Error::Initialization`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory().map_err(|e| {
                Error::Initialization(format!("failed to open in-memory database: {e}"))
            })?
        } else {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| Error::Initialization("no database path configured".into()))?;
            open_file(path)?
        };

        let location = config.path.as_deref().map_or_else(
            || ":memory:".to_string(),
            |p| p.display().to_string(),
        );
        Self::from_connection(conn, config, location)
    }

    pub fn in_memory(execution: ExecutionStrategy) -> Result<Self> {
        Self::open(&StorageConfig::in_memory(execution))
    }

    fn from_connection(conn: Connection, config: &StorageConfig, location: String) -> Result<Self> {
        let pragmas = if config.is_in_memory() {
            "PRAGMA foreign_keys=ON; PRAGMA recursive_triggers=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA recursive_triggers=ON;"
        };
        conn.execute_batch(pragmas)
            .map_err(|e| Error::Initialization(format!("failed to set pragmas: {e}")))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| Error::Initialization(format!("failed to set busy timeout: {e}")))?;

        schema::provision(&conn)?;

        let strategy = resolve_strategy(config.execution);
        let backend: Arc<dyn StorageBackend> = match strategy {
            ExecutionStrategy::Worker => Arc::new(WorkerBackend::spawn(
                conn,
                Duration::from_millis(config.query_timeout_ms.max(1)),
            )?),
            _ => Arc::new(InProcessBackend::new(conn)),
        };
        info!("database ready at {location} ({strategy:?} execution)");

        Ok(Self {
            backend,
            gate: tokio::sync::Mutex::new(()),
            location,
        })
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.backend.strategy()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        let _gate = self.gate.lock().await;
        self.backend.execute(sql, params).await
    }

    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.backend.execute_batch(sql).await
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    info!("opening database at {}", path.display());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Initialization(format!(
                "storage directory {} is unavailable: {e}",
                parent.display()
            ))
        })?;
    }

    Connection::open(path)
        .map_err(|e| Error::Initialization(format!("failed to open database: {e}")))
}

/// `Auto` picks the worker when a tokio runtime drives the caller, so blocking
/// SQLite calls stay off the async executor.
fn resolve_strategy(requested: ExecutionStrategy) -> ExecutionStrategy {
    match requested {
        ExecutionStrategy::Auto => {
            if tokio::runtime::Handle::try_current().is_ok() {
                ExecutionStrategy::Worker
            } else {
                ExecutionStrategy::InProcess
            }
        }
        other => other,
    }
}
