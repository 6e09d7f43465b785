// src/cli/demo.rs
// Seeds a sample block and walks it through the main write and read paths.

use serde_json::{json, Value};
use tracing::info;

use super::{print_json, CliError};
use crate::blocks::definitions::{
    BulkRowUpdate, Filter, FilterOperator, QueryRequest, RowData, Sort, SortDirection,
};
use crate::blocks::{BlockEngine, Column, ColumnType};

const STATUSES: [&str; 3] = ["todo", "doing", "done"];

fn demo_columns() -> Vec<Column> {
    vec![
        Column::new("Item", ColumnType::Text).required(),
        Column::new("Quantity", ColumnType::Number),
        Column::new("Price", ColumnType::Currency),
        Column::new("Status", ColumnType::Select).with_options(STATUSES),
        Column::formula("Total", "Quantity * Price"),
        Column::new("Edited", ColumnType::LastEditedTime),
    ]
}

fn as_row(value: Value) -> RowData {
    value.as_object().cloned().unwrap_or_default()
}

pub fn run(engine: &BlockEngine, rows: usize, actor: &str) -> Result<(), CliError> {
    let block = engine.create_block("Demo orders", demo_columns())?;
    println!("Created block {} ({})", block.name, block.id);

    let seed: Vec<RowData> = (0..rows)
        .map(|i| {
            as_row(json!({
                "Item": format!("item-{:03}", i),
                "Quantity": (i % 7) + 1,
                "Price": ((i * 13) % 40) as f64 + 0.5,
                "Status": STATUSES[i % STATUSES.len()],
            }))
        })
        .collect();
    let created = engine.bulk_create_rows(&block.id, seed, actor);
    println!("Created {} rows ({} errors)", created.created, created.errors.len());

    let updates: Vec<BulkRowUpdate> = created
        .row_ids
        .iter()
        .step_by(3)
        .map(|id| {
            let mut update = BulkRowUpdate::new(id.clone(), as_row(json!({"Status": "done"}))).at_version(1);
            update.actor_id = Some(actor.to_string());
            update
        })
        .collect();
    let updated = engine.bulk_update_rows(&block.id, updates);
    println!("Marked {} rows done ({} errors)", updated.updated, updated.errors.len());

    let mut request = QueryRequest::new(&block.id)
        .with_filter(Filter::new("Status", FilterOperator::Equals, json!("done")))
        .with_sort(Sort::new("Total", SortDirection::Desc))
        .paged(5, 0);
    request.include_aggregations = true;
    let result = engine.get_rows(&request)?;
    info!(
        "Demo query returned {} of {} rows",
        result.rows.len(),
        result.total_count
    );
    print_json(&result)?;

    let report = engine.check_block(&block.id)?;
    println!("{}", report.summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_runs_against_an_in_memory_engine() {
        let engine = BlockEngine::in_memory().unwrap();
        run(&engine, 12, "tester").unwrap();
        let blocks = engine.list_blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].row_count, 12);
        assert!(engine.check_block(&blocks[0].id).unwrap().is_valid());
    }
}
