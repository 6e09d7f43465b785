// src/blocks/database/writer/deletions.rs
// Deletion operations - rows are only ever soft-deleted

use super::super::error::EngineResult;
use rusqlite::{params, Connection};

/// Marks an active row deleted and bumps its version. Returns false when the
/// row is unknown or already deleted.
pub fn soft_delete_row(conn: &Connection, row_id: &str, actor_id: &str, now: &str) -> EngineResult<bool> {
    let changed = conn.execute(
        "UPDATE block_rows
         SET deleted_at = ?, version = version + 1, updated_at = ?, updated_by = ?
         WHERE id = ? AND deleted_at IS NULL",
        params![now, now, actor_id, row_id],
    )?;
    Ok(changed > 0)
}
