//! Durable storage for stream descriptors.

use crate::types::{PartnerConnection, Stream, StreamKey};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use tether_types::{StreamDirection, StreamStatus};

const SELECT_COLUMNS: &str =
    "SELECT endpoint, namespace, format, direction, status, request_id, created_at, updated_at,
            remote_paused
     FROM streams";

/// Creates an `active` input and output stream for every format.
///
/// Existing keys are left untouched, so replaying an acceptance does not
/// reset a stream an operator has since paused. Returns the number of rows
/// actually inserted. Callers that need this to be atomic with a status
/// change run it inside their own transaction.
pub fn create_streams(
    conn: &Connection,
    endpoint: &str,
    namespace: &str,
    formats: &[String],
    request_id: &str,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO streams (endpoint, namespace, format, direction, status, request_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let mut inserted = 0;
    for format in formats {
        for direction in StreamDirection::ALL {
            inserted += stmt.execute(params![
                endpoint,
                namespace,
                format,
                direction.to_string(),
                StreamStatus::Active.to_string(),
                request_id,
            ])?;
        }
    }
    Ok(inserted)
}

pub fn get_stream(conn: &Connection, key: &StreamKey) -> rusqlite::Result<Option<Stream>> {
    conn.query_row(
        &format!(
            "{} WHERE endpoint = ?1 AND namespace = ?2 AND format = ?3 AND direction = ?4",
            SELECT_COLUMNS
        ),
        params![
            key.endpoint,
            key.namespace,
            key.format,
            key.direction.to_string()
        ],
        row_to_stream,
    )
    .optional()
}

/// Lists streams, optionally restricted to one partner endpoint.
pub fn list_streams(conn: &Connection, endpoint: Option<&str>) -> rusqlite::Result<Vec<Stream>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR endpoint = ?1)
         ORDER BY endpoint, namespace, format, direction",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![endpoint], row_to_stream)?;
    rows.collect()
}

/// Compare-and-swap on a stream's status, writing the partner's pause flag
/// alongside. Returns `false` if the stream was not at `from`.
pub fn set_stream_status(
    conn: &Connection,
    key: &StreamKey,
    from: StreamStatus,
    to: StreamStatus,
    remote_paused: bool,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE streams SET status = ?1, remote_paused = ?7, updated_at = datetime('now')
         WHERE endpoint = ?2 AND namespace = ?3 AND format = ?4 AND direction = ?5
           AND status = ?6",
        params![
            to.to_string(),
            key.endpoint,
            key.namespace,
            key.format,
            key.direction.to_string(),
            from.to_string(),
            remote_paused,
        ],
    )?;
    Ok(changed == 1)
}

/// Groups every stored stream by partner endpoint. Endpoints without streams
/// do not appear.
pub fn list_connections(conn: &Connection) -> rusqlite::Result<Vec<PartnerConnection>> {
    let mut grouped: BTreeMap<String, PartnerConnection> = BTreeMap::new();
    for stream in list_streams(conn, None)? {
        let entry = grouped
            .entry(stream.key.endpoint.clone())
            .or_insert_with(|| PartnerConnection {
                endpoint: stream.key.endpoint.clone(),
                input: Vec::new(),
                output: Vec::new(),
            });
        match stream.key.direction {
            StreamDirection::Input => entry.input.push(stream),
            StreamDirection::Output => entry.output.push(stream),
        }
    }
    Ok(grouped.into_values().collect())
}

fn row_to_stream(row: &Row<'_>) -> rusqlite::Result<Stream> {
    let direction: String = row.get(3)?;
    let status: String = row.get(4)?;
    let conversion = |idx: usize, e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    Ok(Stream {
        key: StreamKey {
            endpoint: row.get(0)?,
            namespace: row.get(1)?,
            format: row.get(2)?,
            direction: direction.parse().map_err(|e| conversion(3, e))?,
        },
        status: status.parse().map_err(|e| conversion(4, e))?,
        remote_paused: row.get(8)?,
        request_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
