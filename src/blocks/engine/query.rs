// src/blocks/engine/query.rs
// Read path: cache, then store, then aggregations, then cache populate.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;
use tracing::trace;

use super::BlockEngine;
use crate::blocks::cache::keys::filter_hash;
use crate::blocks::database::error::{EngineError, EngineResult};
use crate::blocks::database::reader::{self, RowQuery};
use crate::blocks::definitions::{Aggregation, Block, QueryRequest, QueryResult, Row, Sort};

impl BlockEngine {
    /// Filtered, sorted, paginated rows of a block, with optional aggregations.
    pub fn get_rows(&self, request: &QueryRequest) -> EngineResult<QueryResult> {
        let mut effective = request.clone();
        effective.limit = effective.limit.clamp(1, self.settings.max_query_limit.max(1));

        // Hits are served without loading the block. That holds only while every
        // schema mutation invalidates the block's entries.
        if let Some(hit) = self.cache.get_query(&effective) {
            trace!("Query cache hit for block {}", effective.block_id);
            return Ok(hit);
        }

        // Observed before the store read; a write landing in between retires it.
        let generation = self.cache.generation(&effective.block_id);
        let result = self.db.read(|conn| self.run_query(conn, &effective, generation))?;
        self.cache.put_query(&effective, &result, generation);
        Ok(result)
    }

    fn run_query(
        &self,
        conn: &Connection,
        request: &QueryRequest,
        generation: u64,
    ) -> EngineResult<QueryResult> {
        let block = reader::load_block(conn, &request.block_id)?;
        let view = match &request.view_id {
            Some(view_id) => Some(
                block
                    .view(view_id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("view {}", view_id)))?,
            ),
            None => None,
        };

        let mut filters = Vec::new();
        let mut sorts = Vec::new();
        let mut visible: Vec<String> = Vec::new();
        if let Some(view) = &view {
            filters.extend(view.filters.iter().cloned());
            sorts.extend(by_priority(&view.sorts));
            visible = view.visible_columns.clone();
        }
        filters.extend(request.filters.iter().cloned());
        // View sorts stay the primary keys whatever the request's priorities.
        sorts.extend(by_priority(&request.sorts));

        let query = RowQuery::new(&block, filters.clone(), sorts, request.search.clone())?;
        let total_count = query.count(conn)?;
        let rows = query.fetch(conn, request.limit, request.offset)?;

        let aggregations = if request.include_aggregations {
            let hash = filter_hash(&filters, request.search.as_deref())?;
            self.aggregate(conn, &block, &query, &visible, &hash, total_count, generation)?
        } else {
            BTreeMap::new()
        };

        let rows = rows
            .into_iter()
            .map(|row| shape_row(row, request, &visible))
            .collect();

        Ok(QueryResult {
            rows,
            total_count,
            has_more: (request.offset as u64).saturating_add(request.limit as u64) < total_count,
            aggregations,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn aggregate(
        &self,
        conn: &Connection,
        block: &Block,
        query: &RowQuery<'_>,
        visible: &[String],
        hash: &str,
        total_count: u64,
        generation: u64,
    ) -> EngineResult<BTreeMap<String, Aggregation>> {
        let mut out = BTreeMap::new();
        let columns = block
            .columns
            .iter()
            .filter(|c| visible.is_empty() || visible.contains(&c.column_id));
        for column in columns {
            let Some(kind) = column.column_type.aggregation() else {
                continue;
            };
            if let Some(hit) = self.cache.get_aggregation(&block.id, &column.column_id, kind, hash) {
                out.insert(column.column_id.clone(), hit);
                continue;
            }
            if let Some(aggregation) = query.aggregate(conn, column)? {
                self.cache.put_aggregation(
                    &block.id,
                    &column.column_id,
                    kind,
                    hash,
                    &aggregation,
                    total_count as usize,
                    generation,
                );
                out.insert(column.column_id.clone(), aggregation);
            }
        }
        Ok(out)
    }
}

/// Stable: equal priorities keep their list order.
fn by_priority(sorts: &[Sort]) -> Vec<Sort> {
    let mut sorted = sorts.to_vec();
    sorted.sort_by_key(|s| s.priority);
    sorted
}

/// Applies the request's include flags and the view's column projection.
fn shape_row(mut row: Row, request: &QueryRequest, visible: &[String]) -> Row {
    if !visible.is_empty() {
        let keep: BTreeSet<&str> = visible.iter().map(String::as_str).collect();
        row.data.retain(|k, _| keep.contains(k.as_str()));
        row.computed_data.retain(|k, _| keep.contains(k.as_str()));
    }
    if !request.include_computed_data {
        row.computed_data.clear();
    }
    if !request.include_metadata {
        row.metadata = None;
    }
    row
}
