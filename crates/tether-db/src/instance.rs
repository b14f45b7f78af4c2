//! Persistent identity of this deployment.

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// Returns this instance's id, minting and storing one on first call.
///
/// The id is exchanged with partners during registration and ends up in
/// their connection cross-reference, so it must survive restarts.
pub fn load_or_create_instance_id(conn: &Connection) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT instance_id FROM instance_identity WHERE singleton = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    // A concurrent starter may have won the race; keep whichever row landed.
    conn.execute(
        "INSERT OR IGNORE INTO instance_identity (singleton, instance_id) VALUES (1, ?1)",
        [&id],
    )?;
    let stored: String = conn.query_row(
        "SELECT instance_id FROM instance_identity WHERE singleton = 1",
        [],
        |row| row.get(0),
    )?;

    tracing::info!(instance_id = %stored, "instance identity initialized");
    Ok(stored)
}
