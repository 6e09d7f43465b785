// src/cli/list_blocks.rs
use serde::Serialize;

use super::{print_json, CliError};
use crate::blocks::BlockEngine;

#[derive(Serialize)]
struct BlockSummary<'a> {
    id: &'a str,
    name: &'a str,
    schema_version: i64,
    row_count: i64,
    columns: Vec<String>,
    views: Vec<&'a str>,
}

pub fn run(engine: &BlockEngine) -> Result<(), CliError> {
    let blocks = engine.list_blocks()?;
    let summaries: Vec<BlockSummary> = blocks
        .iter()
        .map(|b| BlockSummary {
            id: &b.id,
            name: &b.name,
            schema_version: b.schema_version,
            row_count: b.row_count,
            columns: b
                .columns
                .iter()
                .map(|c| format!("{} ({})", c.column_id, c.column_type))
                .collect(),
            views: b.views.iter().map(|v| v.name.as_str()).collect(),
        })
        .collect();
    print_json(&summaries)
}
