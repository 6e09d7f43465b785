// src/cli/query_rows.rs
use serde_json::Value;

use super::{print_json, CliError};
use crate::blocks::definitions::{Filter, FilterOperator, QueryRequest, Sort, SortDirection};
use crate::blocks::BlockEngine;

pub fn run(engine: &BlockEngine, request: &QueryRequest) -> Result<(), CliError> {
    let result = engine.get_rows(request)?;
    print_json(&result)
}

#[allow(clippy::too_many_arguments)]
pub fn build_request(
    block_id: &str,
    filters: &[String],
    sorts: &[String],
    search: Option<String>,
    view: Option<String>,
    limit: usize,
    offset: usize,
    aggregations: bool,
) -> Result<QueryRequest, CliError> {
    let mut request = QueryRequest::new(block_id).paged(limit, offset);
    for raw in filters {
        request = request.with_filter(parse_filter(raw)?);
    }
    for (priority, raw) in sorts.iter().enumerate() {
        let mut sort = parse_sort(raw);
        sort.priority = priority as i32;
        request = request.with_sort(sort);
    }
    request.search = search.filter(|s| !s.is_empty());
    request.view_id = view;
    request.include_aggregations = aggregations;
    Ok(request)
}

/// `column:operator[:value]`. The value is read as JSON when it parses,
/// otherwise as a plain string, so `Qty:greater_than:3` compares numbers.
pub fn parse_filter(raw: &str) -> Result<Filter, CliError> {
    let mut parts = raw.splitn(3, ':');
    let column = parts.next().unwrap_or_default().trim();
    let operator = parts.next().map(str::trim).unwrap_or_default();
    if column.is_empty() || operator.is_empty() {
        return Err(CliError::Argument(format!(
            "filter '{}' must look like column:operator:value",
            raw
        )));
    }
    let operator: FilterOperator = serde_json::from_value(Value::String(operator.to_string()))
        .map_err(|_| CliError::Argument(format!("unknown filter operator '{}'", operator)))?;
    let value = match parts.next() {
        Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        None if operator.needs_value() => {
            return Err(CliError::Argument(format!("filter '{}' needs a value", raw)));
        }
        None => Value::Null,
    };
    Ok(Filter::new(column, operator, value))
}

/// `column` or `column:asc|desc`.
pub fn parse_sort(raw: &str) -> Sort {
    match raw.rsplit_once(':') {
        Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => Sort::new(column, SortDirection::Desc),
        Some((column, dir)) if dir.eq_ignore_ascii_case("asc") => Sort::new(column, SortDirection::Asc),
        _ => Sort::new(raw, SortDirection::Asc),
    }
}
