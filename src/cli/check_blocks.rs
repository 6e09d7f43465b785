// src/cli/check_blocks.rs
use super::{print_json, CliError};
use crate::blocks::BlockEngine;

/// Prints one report per block. Fails when any block has issues.
pub fn run(engine: &BlockEngine, block_id: Option<&str>) -> Result<(), CliError> {
    let ids: Vec<String> = match block_id {
        Some(id) => vec![id.to_string()],
        None => engine.list_blocks()?.into_iter().map(|b| b.id).collect(),
    };

    let mut reports = Vec::with_capacity(ids.len());
    for id in &ids {
        reports.push(engine.check_block(id)?);
    }
    print_json(&reports)?;

    let failed = reports.iter().filter(|r| !r.is_valid()).count();
    if failed > 0 {
        return Err(CliError::IntegrityFailed(failed));
    }
    Ok(())
}
