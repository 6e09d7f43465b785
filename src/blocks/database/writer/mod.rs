// src/blocks/database/writer/mod.rs
// Every SQL write to row data goes through DbWriter.

mod deletions;
mod helpers;
mod insertions;
mod updates;

#[cfg(test)]
pub mod test_helpers;

use super::error::EngineResult;
use crate::blocks::definitions::{Row, RowData};
use rusqlite::Connection;
use serde_json::Value;

pub use helpers::{new_id, now_timestamp};
pub use updates::MetadataSource;

pub struct DbWriter;

impl DbWriter {
    pub fn insert_row(conn: &Connection, row: &Row) -> EngineResult<()> {
        insertions::insert_row(conn, row)
    }

    /// Returns true when the row was at `expected_version` and is now at
    /// `expected_version + 1`.
    pub fn compare_and_update(
        conn: &Connection,
        row_id: &str,
        expected_version: i64,
        data: &RowData,
        computed: &RowData,
        actor_id: &str,
        now: &str,
    ) -> EngineResult<bool> {
        let changed =
            updates::compare_and_update(conn, row_id, expected_version, data, computed, actor_id, now)?;
        Ok(changed == 1)
    }

    pub fn write_computed(conn: &Connection, row_id: &str, computed: &RowData) -> EngineResult<bool> {
        Ok(updates::write_computed(conn, row_id, computed)? > 0)
    }

    pub fn soft_delete_row(conn: &Connection, row_id: &str, actor_id: &str, now: &str) -> EngineResult<bool> {
        deletions::soft_delete_row(conn, row_id, actor_id, now)
    }

    pub fn strip_column(conn: &Connection, block_id: &str, column_id: &str) -> EngineResult<usize> {
        let changed = updates::strip_column(conn, block_id, column_id)?;
        tracing::debug!("Stripped column '{}' from {} rows of block {}", column_id, changed, block_id);
        Ok(changed)
    }

    pub fn backfill_column(
        conn: &Connection,
        block_id: &str,
        column_id: &str,
        value: &Value,
    ) -> EngineResult<usize> {
        updates::backfill_column(conn, block_id, column_id, value)
    }

    pub fn backfill_from_metadata(
        conn: &Connection,
        block_id: &str,
        column_id: &str,
        source: MetadataSource,
    ) -> EngineResult<usize> {
        updates::backfill_from_metadata(conn, block_id, column_id, source)
    }
}
