// src/blocks/database/connection.rs

use super::error::EngineResult;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub struct DbConnection;

impl DbConnection {
    /// Opens (or creates) a database file with WAL journaling and the block tables.
    pub fn open(path: &Path, busy_timeout: Duration) -> EngineResult<Connection> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        // PRAGMA settings are per connection, so this runs on every open.
        let journal_mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            warn!(
                "Failed to set WAL mode on database {:?}. Current mode: {}",
                path.file_name(),
                journal_mode
            );
        } else {
            debug!("WAL mode activated for database {:?}", path.file_name());
        }

        Self::configure(&conn, busy_timeout)?;
        super::schema::ensure_tables(&conn)?;
        Ok(conn)
    }

    /// Private in-memory database, used by tests and the demo command.
    pub fn open_in_memory() -> EngineResult<Connection> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, Duration::from_millis(0))?;
        super::schema::ensure_tables(&conn)?;
        Ok(conn)
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> EngineResult<()> {
        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA temp_store=MEMORY;",
        )?;
        conn.busy_timeout(busy_timeout)?;
        Ok(())
    }
}
