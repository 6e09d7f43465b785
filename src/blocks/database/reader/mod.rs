// src/blocks/database/reader/mod.rs
mod queries;
mod rows;

use super::error::EngineResult;
use crate::blocks::definitions::{Block, Row};
use rusqlite::Connection;

pub use queries::*;
pub use rows::RowQuery;
pub(crate) use rows::{sql_value, value_expr};

pub struct DbReader;

impl DbReader {
    /// Block with its columns and views. Missing block is `NotFound`.
    pub fn read_block(conn: &Connection, block_id: &str) -> EngineResult<Block> {
        queries::load_block(conn, block_id)
    }

    pub fn read_all_blocks(conn: &Connection) -> EngineResult<Vec<Block>> {
        let ids = queries::list_block_ids(conn)?;
        let mut blocks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(block) = queries::find_block(conn, &id)? {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    /// Active rows with the given ids, in the order the ids were given. Unknown
    /// or deleted ids are skipped.
    pub fn read_active_rows(conn: &Connection, row_ids: &[String]) -> EngineResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(row_ids.len());
        for id in row_ids {
            if let Some(row) = queries::find_row(conn, id)? {
                if !row.is_deleted() {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }
}
