// src/blocks/database/reader/queries.rs
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::super::error::{EngineError, EngineResult};
use super::rows::{sql_value, value_expr};
use crate::blocks::column_definition::Column;
use crate::blocks::column_type::parse_column_type;
use crate::blocks::definitions::{Block, Row, RowMetadata, View};

pub(crate) const ROW_COLUMNS: &str = "r.id, r.block_id, r.data, r.computed_data, r.version, \
     r.position, r.auto_number, r.deleted_at, r.created_at, r.updated_at, r.created_by, r.updated_by";

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decodes a row selected with `ROW_COLUMNS`.
pub(crate) fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<Row> {
    Ok(Row {
        id: row.get(0)?,
        block_id: row.get(1)?,
        data: json_column(row, 2)?,
        computed_data: json_column(row, 3)?,
        version: row.get(4)?,
        position: row.get(5)?,
        auto_number: row.get(6)?,
        deleted_at: row.get(7)?,
        metadata: Some(RowMetadata {
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            created_by: row.get(10)?,
            updated_by: row.get(11)?,
        }),
    })
}

pub fn read_columns(conn: &Connection, block_id: &str) -> EngineResult<Vec<Column>> {
    let mut stmt = conn.prepare(
        "SELECT column_id, name, column_type, is_formula, formula_expression, is_required,
                is_unique, default_value, options, position
         FROM block_columns WHERE block_id = ? ORDER BY position, column_id",
    )?;
    let rows = stmt.query_map(params![block_id], |row| {
        let type_name: String = row.get(2)?;
        let column_type = parse_column_type(&type_name).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown column type '{}'", type_name).into(),
            )
        })?;
        let default_value: Option<String> = row.get(7)?;
        let default_value = default_value
            .map(|text| serde_json::from_str::<Value>(&text))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
        Ok(Column {
            column_id: row.get(0)?,
            name: row.get(1)?,
            column_type,
            is_formula: row.get::<_, i64>(3)? != 0,
            formula_expression: row.get(4)?,
            is_required: row.get::<_, i64>(5)? != 0,
            is_unique: row.get::<_, i64>(6)? != 0,
            default_value,
            options: json_column(row, 8)?,
            position: row.get(9)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn read_views(conn: &Connection, block_id: &str) -> EngineResult<Vec<View>> {
    let mut stmt = conn.prepare(
        "SELECT id, block_id, name, filters, sorts, visible_columns
         FROM block_views WHERE block_id = ? ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![block_id], |row| {
        Ok(View {
            id: row.get(0)?,
            block_id: row.get(1)?,
            name: row.get(2)?,
            filters: json_column(row, 3)?,
            sorts: json_column(row, 4)?,
            visible_columns: json_column(row, 5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_block(conn: &Connection, block_id: &str) -> EngineResult<Option<Block>> {
    let header = conn
        .query_row(
            "SELECT id, name, schema_version, settings, row_count, created_at, updated_at
             FROM blocks WHERE id = ?",
            params![block_id],
            |row| {
                Ok(Block {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    schema_version: row.get(2)?,
                    columns: Vec::new(),
                    views: Vec::new(),
                    settings: json_column(row, 3)?,
                    row_count: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    let Some(mut block) = header else {
        return Ok(None);
    };
    block.columns = read_columns(conn, block_id)?;
    block.views = read_views(conn, block_id)?;
    Ok(Some(block))
}

pub fn load_block(conn: &Connection, block_id: &str) -> EngineResult<Block> {
    find_block(conn, block_id)?.ok_or_else(|| EngineError::NotFound(format!("block {}", block_id)))
}

pub fn list_block_ids(conn: &Connection) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM blocks ORDER BY created_at, id")?;
    let ids = stmt.query_map([], |row| row.get(0))?;
    Ok(ids.collect::<Result<Vec<_>, _>>()?)
}

/// Row by id, including soft-deleted rows. Callers decide what a deleted row means.
pub fn find_row(conn: &Connection, row_id: &str) -> EngineResult<Option<Row>> {
    let sql = format!("SELECT {} FROM block_rows r WHERE r.id = ?", ROW_COLUMNS);
    Ok(conn.query_row(&sql, params![row_id], row_from_sql).optional()?)
}

/// Active row ids of a block in display order.
pub fn active_row_ids(conn: &Connection, block_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM block_rows WHERE block_id = ? AND deleted_at IS NULL
         ORDER BY position, auto_number",
    )?;
    let ids = stmt.query_map(params![block_id], |row| row.get(0))?;
    Ok(ids.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_active_rows(conn: &Connection, block_id: &str) -> EngineResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM block_rows WHERE block_id = ? AND deleted_at IS NULL",
        params![block_id],
        |row| row.get(0),
    )?)
}

/// Next (position, auto_number) for a new row. Both count deleted rows too so
/// they never repeat within a block.
pub fn next_row_slot(conn: &Connection, block_id: &str) -> EngineResult<(i64, i64)> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1, COALESCE(MAX(auto_number), 0) + 1
         FROM block_rows WHERE block_id = ?",
        params![block_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

/// Id of another active row holding `value` in `column`, if any.
pub fn find_duplicate(
    conn: &Connection,
    block_id: &str,
    column: &Column,
    value: &Value,
    exclude_row_id: Option<&str>,
) -> EngineResult<Option<String>> {
    let sql = format!(
        "SELECT r.id FROM block_rows r
         WHERE r.block_id = ? AND r.deleted_at IS NULL AND r.id != ? AND {} = ?
         LIMIT 1",
        value_expr(column)
    );
    Ok(conn
        .query_row(
            &sql,
            params![block_id, exclude_row_id.unwrap_or(""), sql_value(value)],
            |row| row.get(0),
        )
        .optional()?)
}
