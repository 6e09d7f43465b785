// src/blocks/database/writer/insertions.rs
// Insert operations - new rows

use super::super::error::EngineResult;
use super::helpers::data_text;
use crate::blocks::definitions::Row;
use rusqlite::{params, Connection};

/// Insert a fully materialized row. Metadata must be present.
pub fn insert_row(conn: &Connection, row: &Row) -> EngineResult<()> {
    let (created_at, updated_at, created_by, updated_by) = match &row.metadata {
        Some(m) => (&m.created_at, &m.updated_at, &m.created_by, &m.updated_by),
        None => {
            return Err(super::super::error::EngineError::Internal(format!(
                "row {} has no metadata to insert",
                row.id
            )))
        }
    };
    conn.execute(
        "INSERT INTO block_rows (id, block_id, data, computed_data, version, position, auto_number,
            created_at, updated_at, created_by, updated_by, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
        params![
            row.id,
            row.block_id,
            data_text(&row.data),
            data_text(&row.computed_data),
            row.version,
            row.position,
            row.auto_number,
            created_at,
            updated_at,
            created_by,
            updated_by,
        ],
    )?;
    Ok(())
}
