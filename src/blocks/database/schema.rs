// src/blocks/database/schema.rs
// Table layout plus writes to the block, column and view tables.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::error::{EngineError, EngineResult};
use crate::blocks::column_definition::Column;
use crate::blocks::definitions::{Block, View};

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create block, column, view and row tables",
        sql: "CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schema_version INTEGER NOT NULL DEFAULT 1,
                settings TEXT NOT NULL DEFAULT '{}',
                row_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS block_columns (
                block_id TEXT NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                column_id TEXT NOT NULL,
                name TEXT NOT NULL,
                column_type TEXT NOT NULL,
                is_formula INTEGER NOT NULL DEFAULT 0,
                formula_expression TEXT,
                is_required INTEGER NOT NULL DEFAULT 0,
                is_unique INTEGER NOT NULL DEFAULT 0,
                default_value TEXT,
                options TEXT NOT NULL DEFAULT '[]',
                position INTEGER NOT NULL,
                PRIMARY KEY (block_id, column_id)
            );
            CREATE TABLE IF NOT EXISTS block_views (
                id TEXT PRIMARY KEY,
                block_id TEXT NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                filters TEXT NOT NULL DEFAULT '[]',
                sorts TEXT NOT NULL DEFAULT '[]',
                visible_columns TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS block_rows (
                id TEXT PRIMARY KEY,
                block_id TEXT NOT NULL REFERENCES blocks(id) ON DELETE CASCADE,
                data TEXT NOT NULL DEFAULT '{}',
                computed_data TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
                position INTEGER NOT NULL,
                auto_number INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_block_rows_block_deleted
                ON block_rows(block_id, deleted_at);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_block_rows_auto_number
                ON block_rows(block_id, auto_number);",
    },
];

/// Creates the migration ledger and applies any migration not yet recorded.
pub fn ensure_tables(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )?;
    for migration in MIGRATIONS {
        if is_migration_applied(conn, migration.version)? {
            continue;
        }
        conn.execute_batch(migration.sql)?;
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?, ?)",
            params![migration.version, migration.description],
        )?;
        info!("Applied migration {}: {}", migration.version, migration.description);
    }
    Ok(())
}

pub fn is_migration_applied(conn: &Connection, version: i64) -> EngineResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT version FROM _migrations WHERE version = ?",
            params![version],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_block(conn: &Connection, block: &Block) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO blocks (id, name, schema_version, settings, row_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            block.id,
            block.name,
            block.schema_version,
            serde_json::to_string(&block.settings)?,
            block.row_count,
            block.created_at,
            block.updated_at,
        ],
    )?;
    replace_columns(conn, &block.id, &block.columns)?;
    for view in &block.views {
        insert_view(conn, view, &block.created_at)?;
    }
    Ok(())
}

/// Rewrites the block's full column list. Positions are taken from the columns.
pub fn replace_columns(conn: &Connection, block_id: &str, columns: &[Column]) -> EngineResult<()> {
    conn.execute("DELETE FROM block_columns WHERE block_id = ?", params![block_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO block_columns (block_id, column_id, name, column_type, is_formula,
            formula_expression, is_required, is_unique, default_value, options, position)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for column in columns {
        let default_value = column
            .default_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        stmt.execute(params![
            block_id,
            column.column_id,
            column.name,
            column.column_type.as_str(),
            column.is_formula as i32,
            column.formula_expression,
            column.is_required as i32,
            column.is_unique as i32,
            default_value,
            serde_json::to_string(&column.options)?,
            column.position,
        ])?;
    }
    Ok(())
}

/// Increments `schema_version` and returns the new value.
pub fn bump_schema_version(conn: &Connection, block_id: &str, now: &str) -> EngineResult<i64> {
    let version: Option<i64> = conn
        .query_row(
            "UPDATE blocks SET schema_version = schema_version + 1, updated_at = ?
             WHERE id = ? RETURNING schema_version",
            params![now, block_id],
            |row| row.get(0),
        )
        .optional()?;
    version.ok_or_else(|| EngineError::NotFound(format!("block {}", block_id)))
}

pub fn touch_block(conn: &Connection, block_id: &str, now: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE blocks SET updated_at = ? WHERE id = ?",
        params![now, block_id],
    )?;
    Ok(())
}

pub fn adjust_row_count(conn: &Connection, block_id: &str, delta: i64) -> EngineResult<()> {
    if delta != 0 {
        conn.execute(
            "UPDATE blocks SET row_count = MAX(row_count + ?, 0) WHERE id = ?",
            params![delta, block_id],
        )?;
    }
    Ok(())
}

pub fn set_row_count(conn: &Connection, block_id: &str, row_count: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE blocks SET row_count = ? WHERE id = ?",
        params![row_count, block_id],
    )?;
    Ok(())
}

pub fn insert_view(conn: &Connection, view: &View, now: &str) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO block_views (id, block_id, name, filters, sorts, visible_columns, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            view.id,
            view.block_id,
            view.name,
            serde_json::to_string(&view.filters)?,
            serde_json::to_string(&view.sorts)?,
            serde_json::to_string(&view.visible_columns)?,
            now,
        ],
    )?;
    Ok(())
}

pub fn update_view(conn: &Connection, view: &View) -> EngineResult<()> {
    conn.execute(
        "UPDATE block_views SET name = ?, filters = ?, sorts = ?, visible_columns = ?
         WHERE id = ? AND block_id = ?",
        params![
            view.name,
            serde_json::to_string(&view.filters)?,
            serde_json::to_string(&view.sorts)?,
            serde_json::to_string(&view.visible_columns)?,
            view.id,
            view.block_id,
        ],
    )?;
    Ok(())
}

pub fn delete_view(conn: &Connection, block_id: &str, view_id: &str) -> EngineResult<usize> {
    Ok(conn.execute(
        "DELETE FROM block_views WHERE id = ? AND block_id = ?",
        params![view_id, block_id],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tables(&conn).unwrap();
        ensure_tables(&conn).unwrap();
        assert!(is_migration_applied(&conn, 1).unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn bump_schema_version_on_missing_block_is_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tables(&conn).unwrap();
        assert!(matches!(
            bump_schema_version(&conn, "nope", "now"),
            Err(EngineError::NotFound(_))
        ));
    }
}
