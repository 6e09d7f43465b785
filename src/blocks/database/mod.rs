// src/blocks/database/mod.rs

pub mod connection;
pub mod error;
pub mod reader;
pub mod retry;
pub mod schema;
pub mod validation;
pub mod writer;

pub use connection::DbConnection;
pub use error::{EngineError, EngineResult, FieldError};
pub use reader::DbReader;
pub use retry::RetryPolicy;
pub use validation::IntegrityReport;
pub use writer::DbWriter;

use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::error;

/// Database storage configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn default_path() -> PathBuf {
        let documents = directories_next::UserDirs::new()
            .and_then(|dirs| dirs.document_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        documents.join("BlockDB").join("blocks.db")
    }

    pub fn new() -> Self {
        Self {
            db_path: Self::default_path(),
            busy_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: path.as_ref().to_path_buf(),
            ..Self::new()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one SQLite database. The connection sits behind a mutex, so the
/// handle is `Send + Sync` and operations on it are serialized.
pub struct Database {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl Database {
    pub fn open(config: &StoreConfig) -> EngineResult<Self> {
        let conn = DbConnection::open(&config.db_path, config.busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry: config.retry,
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Ok(Self {
            conn: Mutex::new(DbConnection::open_in_memory()?),
            retry: RetryPolicy::new(1, Duration::ZERO),
        })
    }

    /// Runs a read. Transient busy/locked failures are retried.
    pub fn read<T, F>(&self, mut f: F) -> EngineResult<T>
    where
        F: FnMut(&Connection) -> EngineResult<T>,
    {
        retry::retry_with_backoff(&self.retry, EngineError::is_transient, || {
            let conn = self.lock()?;
            f(&conn)
        })
    }

    /// Runs `f` inside one IMMEDIATE transaction: commit on `Ok`, roll back on
    /// `Err`. Transient failures rerun the whole closure.
    pub fn write<T, F>(&self, mut f: F) -> EngineResult<T>
    where
        F: FnMut(&Connection) -> EngineResult<T>,
    {
        let result = retry::retry_with_backoff(&self.retry, EngineError::is_transient, || {
            let mut conn = self.lock()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        });
        if let Err(e) = &result {
            if matches!(e, EngineError::Storage(_)) {
                error!("Storage write failed: {}", e);
            }
        }
        result
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Internal("database mutex poisoned".to_string()))
    }
}
