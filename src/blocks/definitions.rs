// src/blocks/definitions.rs
// Plain data types exchanged with callers. Everything here is serde-friendly so
// the engine stays transport-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::column_definition::Column;

pub type RowData = Map<String, Value>;

/// Actor recorded for writes that do not name one.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub name: String,
    pub schema_version: i64,
    pub columns: Vec<Column>,
    pub views: Vec<View>,
    #[serde(default)]
    pub settings: Value,
    pub row_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Block {
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }

    pub fn view(&self, view_id: &str) -> Option<&View> {
        self.views.iter().find(|v| v.id == view_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    IsEmpty,
    IsNotEmpty,
}

impl FilterOperator {
    pub fn needs_value(&self) -> bool {
        !matches!(self, FilterOperator::IsEmpty | FilterOperator::IsNotEmpty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub column_id: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(column_id: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            column_id: column_id.into(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub column_id: String,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub priority: i32,
}

impl Sort {
    pub fn new(column_id: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column_id: column_id.into(),
            direction,
            priority: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub id: String,
    pub block_id: String,
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub visible_columns: Vec<String>,
}

/// Input for creating a view; the engine assigns the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub visible_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMetadata {
    pub created_at: String,
    pub updated_at: String,
    pub created_by: String,
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: String,
    pub block_id: String,
    pub data: RowData,
    pub computed_data: RowData,
    pub version: i64,
    pub position: i64,
    pub auto_number: i64,
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RowMetadata>,
}

impl Row {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn default_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub block_id: String,
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_true")]
    pub include_computed_data: bool,
    #[serde(default)]
    pub include_metadata: bool,
    #[serde(default)]
    pub include_aggregations: bool,
}

impl QueryRequest {
    pub fn new(block_id: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            view_id: None,
            limit: default_limit(),
            offset: 0,
            filters: Vec::new(),
            sorts: Vec::new(),
            search: None,
            include_computed_data: true,
            include_metadata: false,
            include_aggregations: false,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_view(mut self, view_id: impl Into<String>) -> Self {
        self.view_id = Some(view_id.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn paged(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Numeric {
        count: u64,
        sum: f64,
        avg: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Distribution {
        count: u64,
        values: BTreeMap<String, u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub total_count: u64,
    pub has_more: bool,
    #[serde(default)]
    pub aggregations: BTreeMap<String, Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRowUpdate {
    pub row_id: String,
    pub data: RowData,
    /// `None` applies the patch against whatever version is stored.
    #[serde(default)]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

impl BulkRowUpdate {
    pub fn new(row_id: impl Into<String>, data: RowData) -> Self {
        Self {
            row_id: row_id.into(),
            data,
            expected_version: None,
            actor_id: None,
        }
    }

    pub fn at_version(mut self, version: i64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub updated: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateResult {
    pub created: usize,
    pub row_ids: Vec<String>,
    pub errors: Vec<String>,
}
