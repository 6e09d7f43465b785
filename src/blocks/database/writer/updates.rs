// src/blocks/database/writer/updates.rs
// Update operations - versioned row writes and column-wide rewrites

use super::super::error::EngineResult;
use super::helpers::{data_text, path_literal};
use crate::blocks::definitions::RowData;
use rusqlite::{params, Connection};
use serde_json::Value;

/// Compare-and-increment write. Returns the number of rows changed: 1 on
/// success, 0 when the row moved past `expected_version`, vanished or was deleted.
pub fn compare_and_update(
    conn: &Connection,
    row_id: &str,
    expected_version: i64,
    data: &RowData,
    computed: &RowData,
    actor_id: &str,
    now: &str,
) -> EngineResult<usize> {
    let changed = conn.execute(
        "UPDATE block_rows
         SET data = ?, computed_data = ?, version = version + 1, updated_at = ?, updated_by = ?
         WHERE id = ? AND version = ? AND deleted_at IS NULL",
        params![
            data_text(data),
            data_text(computed),
            now,
            actor_id,
            row_id,
            expected_version,
        ],
    )?;
    Ok(changed)
}

/// Rewrite derived values only. Leaves `version` untouched.
pub fn write_computed(conn: &Connection, row_id: &str, computed: &RowData) -> EngineResult<usize> {
    Ok(conn.execute(
        "UPDATE block_rows SET computed_data = ? WHERE id = ? AND deleted_at IS NULL",
        params![data_text(computed), row_id],
    )?)
}

/// Remove a column's key from every row of a block, deleted rows included.
pub fn strip_column(conn: &Connection, block_id: &str, column_id: &str) -> EngineResult<usize> {
    let path = path_literal(column_id);
    let sql = format!(
        "UPDATE block_rows SET data = json_remove(data, {p}), computed_data = json_remove(computed_data, {p})
         WHERE block_id = ?",
        p = path
    );
    Ok(conn.execute(&sql, params![block_id])?)
}

/// Set `value` on every active row that lacks the column.
pub fn backfill_column(
    conn: &Connection,
    block_id: &str,
    column_id: &str,
    value: &Value,
) -> EngineResult<usize> {
    let path = path_literal(column_id);
    let sql = format!(
        "UPDATE block_rows SET data = json_set(data, {p}, json(?))
         WHERE block_id = ? AND deleted_at IS NULL AND json_type(data, {p}) IS NULL",
        p = path
    );
    Ok(conn.execute(&sql, params![value.to_string(), block_id])?)
}

/// Row-metadata field a newly added system column is backfilled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    CreatedAt,
    CreatedBy,
    UpdatedAt,
    UpdatedBy,
}

impl MetadataSource {
    fn sql_column(&self) -> &'static str {
        match self {
            MetadataSource::CreatedAt => "created_at",
            MetadataSource::CreatedBy => "created_by",
            MetadataSource::UpdatedAt => "updated_at",
            MetadataSource::UpdatedBy => "updated_by",
        }
    }
}

/// Copy a row-metadata field into `data` for every active row of a block.
pub fn backfill_from_metadata(
    conn: &Connection,
    block_id: &str,
    column_id: &str,
    source: MetadataSource,
) -> EngineResult<usize> {
    let sql = format!(
        "UPDATE block_rows SET data = json_set(data, {}, {})
         WHERE block_id = ? AND deleted_at IS NULL",
        path_literal(column_id),
        source.sql_column()
    );
    Ok(conn.execute(&sql, params![block_id])?)
}
