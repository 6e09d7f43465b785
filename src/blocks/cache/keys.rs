// src/blocks/cache/keys.rs
// Cache key layout:
//   block:{blockId}:query:{hash}
//   block:{blockId}:agg:{columnId}:{aggregationType}:{filterHash}

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::blocks::column_type::AggregationType;
use crate::blocks::definitions::{Filter, QueryRequest};

/// SHA-256 hex of the canonical JSON form of `value`. Object keys serialize in
/// sorted order, so equal values always hash equally.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_value(value)?.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    Ok(out)
}

pub fn block_prefix(block_id: &str) -> String {
    format!("block:{}:", block_id)
}

/// Pattern matching every cached entry of a block.
pub fn block_pattern(block_id: &str) -> String {
    format!("block:{}:*", block_id)
}

pub fn query_key(request: &QueryRequest) -> Result<String, serde_json::Error> {
    let hash = stable_hash(&json!({
        "blockId": request.block_id,
        "viewId": request.view_id,
        "limit": request.limit,
        "offset": request.offset,
        "filters": request.filters,
        "sorts": request.sorts,
        "search": request.search,
        "includeComputedData": request.include_computed_data,
        "includeMetadata": request.include_metadata,
        "includeAggregations": request.include_aggregations,
    }))?;
    Ok(format!("block:{}:query:{}", request.block_id, hash))
}

/// Hash of the row set an aggregation covers.
pub fn filter_hash(filters: &[Filter], search: Option<&str>) -> Result<String, serde_json::Error> {
    stable_hash(&json!({ "filters": filters, "search": search }))
}

pub fn aggregation_key(
    block_id: &str,
    column_id: &str,
    aggregation: AggregationType,
    filter_hash: &str,
) -> String {
    format!(
        "block:{}:agg:{}:{}:{}",
        block_id,
        column_id,
        aggregation.as_str(),
        filter_hash
    )
}
