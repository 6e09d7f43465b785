// src/blocks/database/writer/test_helpers.rs
// Test utilities for database writer and reader tests

#![cfg(test)]

use rusqlite::Connection;
use serde_json::{json, Value};

use super::super::connection::DbConnection;
use super::super::schema;
use super::helpers::{new_id, now_timestamp};
use crate::blocks::column_definition::Column;
use crate::blocks::column_type::ColumnType;
use crate::blocks::definitions::{Block, Row, RowData, RowMetadata};

/// Fresh in-memory database with the block tables created.
pub fn open_test_db() -> Connection {
    DbConnection::open_in_memory().unwrap()
}

/// `Name:text`, `Qty:number`, `Status:select`, `Double:formula(Qty*2)`.
pub fn sample_columns() -> Vec<Column> {
    let mut columns = vec![
        Column::new("Name", ColumnType::Text),
        Column::new("Qty", ColumnType::Number),
        Column::new("Status", ColumnType::Select).with_options(["todo", "done"]),
        Column::formula("Double", "Qty*2"),
    ];
    for (i, c) in columns.iter_mut().enumerate() {
        c.position = i as i64;
    }
    columns
}

pub fn insert_test_block(conn: &Connection, columns: Vec<Column>) -> Block {
    let now = now_timestamp();
    let block = Block {
        id: new_id(),
        name: "Test".to_string(),
        schema_version: 1,
        columns,
        views: Vec::new(),
        settings: json!({}),
        row_count: 0,
        created_at: now.clone(),
        updated_at: now,
    };
    schema::insert_block(conn, &block).unwrap();
    block
}

/// Inserts a row as stored, without materialization or derived evaluation.
pub fn insert_test_row(conn: &Connection, block: &Block, position: i64, data: Value, computed: Value) -> Row {
    let now = now_timestamp();
    let row = Row {
        id: new_id(),
        block_id: block.id.clone(),
        data: as_map(data),
        computed_data: as_map(computed),
        version: 1,
        position,
        auto_number: position + 1,
        deleted_at: None,
        metadata: Some(RowMetadata {
            created_at: now.clone(),
            updated_at: now,
            created_by: "tester".to_string(),
            updated_by: "tester".to_string(),
        }),
    };
    super::insertions::insert_row(conn, &row).unwrap();
    schema::adjust_row_count(conn, &block.id, 1).unwrap();
    row
}

pub fn as_map(value: Value) -> RowData {
    value.as_object().cloned().unwrap_or_default()
}

/// Forces a stored version, simulating a concurrent writer.
pub fn force_version(conn: &Connection, row_id: &str, version: i64) {
    conn.execute(
        "UPDATE block_rows SET version = ? WHERE id = ?",
        rusqlite::params![version, row_id],
    )
    .unwrap();
}

/// Puts a derived key into `data`, producing an integrity violation.
pub fn corrupt_data_key(conn: &Connection, row_id: &str, key: &str) {
    let sql = format!(
        "UPDATE block_rows SET data = json_set(data, {}, 1) WHERE id = ?",
        super::helpers::path_literal(key)
    );
    conn.execute(&sql, rusqlite::params![row_id]).unwrap();
}
