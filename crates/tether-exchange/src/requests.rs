//! Durable storage for connection request records.
//!
//! Pure persistence: these functions never decide whether a transition is
//! allowed. Status changes go through [`transition_status`], a
//! compare-and-swap that only writes when the stored status still matches
//! what the caller read.

use crate::types::{ConnectionRef, ConnectionRequest};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use tether_types::{RequestDirection, RequestStatus};

const SELECT_COLUMNS: &str = "SELECT id, direction, consumer_endpoint, provider_endpoint, namespace,
        organization, formats_json, verification_code, acceptance_token, status,
        creation_date, partner_instance_id, connection_account_id, connection_external_id,
        connection_instance_id
     FROM connection_requests";

/// Inserts a new record. Fails on a duplicate `(id, direction)`.
pub fn insert_request(conn: &Connection, request: &ConnectionRequest) -> rusqlite::Result<()> {
    let formats_json = serde_json::to_string(&request.formats)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let connection = request.connection.as_ref();

    conn.execute(
        "INSERT INTO connection_requests (
            id, direction, consumer_endpoint, provider_endpoint, namespace, organization,
            formats_json, verification_code, acceptance_token, status, creation_date,
            partner_instance_id, connection_account_id, connection_external_id,
            connection_instance_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            request.id,
            request.direction.to_string(),
            request.consumer_endpoint,
            request.provider_endpoint,
            request.namespace,
            request.organization,
            formats_json,
            request.verification_code,
            request.acceptance_token,
            request.status.to_string(),
            request.creation_date,
            request.partner_instance_id,
            connection.map(|c| c.external_account_id.as_str()),
            connection.map(|c| c.external_id.as_str()),
            connection.map(|c| c.instance_id.as_str()),
        ],
    )?;
    Ok(())
}

/// Fetches a record by direction and id.
pub fn get_request(
    conn: &Connection,
    direction: RequestDirection,
    id: &str,
) -> rusqlite::Result<Option<ConnectionRequest>> {
    conn.query_row(
        &format!("{} WHERE direction = ?1 AND id = ?2", SELECT_COLUMNS),
        params![direction.to_string(), id],
        row_to_request,
    )
    .optional()
}

/// Lists all records for one direction, newest first.
pub fn list_requests(
    conn: &Connection,
    direction: RequestDirection,
) -> rusqlite::Result<Vec<ConnectionRequest>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE direction = ?1 ORDER BY creation_date DESC, id",
        SELECT_COLUMNS
    ))?;
    let rows = stmt.query_map(params![direction.to_string()], row_to_request)?;
    rows.collect()
}

/// Moves a record from `from` to `to`, optionally recording the partner
/// cross-reference in the same statement.
///
/// Returns `false` when the record was not at `from` (or does not exist), in
/// which case nothing was written.
pub fn transition_status(
    conn: &Connection,
    direction: RequestDirection,
    id: &str,
    from: RequestStatus,
    to: RequestStatus,
    connection: Option<&ConnectionRef>,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE connection_requests SET
            status = ?1,
            connection_account_id = COALESCE(?2, connection_account_id),
            connection_external_id = COALESCE(?3, connection_external_id),
            connection_instance_id = COALESCE(?4, connection_instance_id),
            updated_at = datetime('now')
         WHERE direction = ?5 AND id = ?6 AND status = ?7",
        params![
            to.to_string(),
            connection.map(|c| c.external_account_id.as_str()),
            connection.map(|c| c.external_id.as_str()),
            connection.map(|c| c.instance_id.as_str()),
            direction.to_string(),
            id,
            from.to_string(),
        ],
    )?;
    Ok(changed == 1)
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<ConnectionRequest> {
    let formats_json: String = row.get(6)?;
    let formats: Vec<String> = serde_json::from_str(&formats_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let account: Option<String> = row.get(12)?;
    let external: Option<String> = row.get(13)?;
    let instance: Option<String> = row.get(14)?;
    let connection = match (account, external, instance) {
        (Some(external_account_id), Some(external_id), Some(instance_id)) => Some(ConnectionRef {
            external_account_id,
            external_id,
            instance_id,
        }),
        _ => None,
    };

    Ok(ConnectionRequest {
        id: row.get(0)?,
        direction: parse_column(row, 1)?,
        consumer_endpoint: row.get(2)?,
        provider_endpoint: row.get(3)?,
        namespace: row.get(4)?,
        organization: row.get(5)?,
        formats,
        verification_code: row.get(7)?,
        acceptance_token: row.get(8)?,
        status: parse_column(row, 9)?,
        creation_date: row.get(10)?,
        partner_instance_id: row.get(11)?,
        connection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_db::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample(id: &str, direction: RequestDirection) -> ConnectionRequest {
        ConnectionRequest {
            id: id.to_string(),
            direction,
            consumer_endpoint: "https://consumer.example".to_string(),
            provider_endpoint: "https://provider.example".to_string(),
            namespace: "learning".to_string(),
            organization: "Acme".to_string(),
            formats: vec!["caliper".to_string(), "xAPI".to_string()],
            verification_code: "042917".to_string(),
            acceptance_token: "token-1".to_string(),
            status: RequestStatus::Created,
            creation_date: "2024-05-01T10:00:00+00:00".to_string(),
            partner_instance_id: Some("peer-instance".to_string()),
            connection: None,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let conn = setup_db();
        let record = sample("r1", RequestDirection::Incoming);
        insert_request(&conn, &record).unwrap();

        let loaded = get_request(&conn, RequestDirection::Incoming, "r1")
            .unwrap()
            .expect("record should exist");
        assert_eq!(loaded, record);

        assert!(get_request(&conn, RequestDirection::Submitted, "r1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn same_id_may_exist_once_per_direction() {
        let conn = setup_db();
        insert_request(&conn, &sample("r1", RequestDirection::Incoming)).unwrap();
        insert_request(&conn, &sample("r1", RequestDirection::Submitted)).unwrap();
        assert!(insert_request(&conn, &sample("r1", RequestDirection::Incoming)).is_err());
    }

    #[test]
    fn list_is_partitioned_by_direction() {
        let conn = setup_db();
        insert_request(&conn, &sample("a", RequestDirection::Incoming)).unwrap();
        insert_request(&conn, &sample("b", RequestDirection::Incoming)).unwrap();
        insert_request(&conn, &sample("c", RequestDirection::Submitted)).unwrap();

        let incoming = list_requests(&conn, RequestDirection::Incoming).unwrap();
        assert_eq!(incoming.len(), 2);
        assert!(incoming
            .iter()
            .all(|r| r.direction == RequestDirection::Incoming));

        let submitted = list_requests(&conn, RequestDirection::Submitted).unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].id, "c");
    }

    #[test]
    fn transition_is_compare_and_swap() {
        let conn = setup_db();
        insert_request(&conn, &sample("r1", RequestDirection::Incoming)).unwrap();

        let moved = transition_status(
            &conn,
            RequestDirection::Incoming,
            "r1",
            RequestStatus::Created,
            RequestStatus::AcceptedPending,
            None,
        )
        .unwrap();
        assert!(moved);

        // A second writer that read `created` loses.
        let moved_again = transition_status(
            &conn,
            RequestDirection::Incoming,
            "r1",
            RequestStatus::Created,
            RequestStatus::RejectedPending,
            None,
        )
        .unwrap();
        assert!(!moved_again);

        let loaded = get_request(&conn, RequestDirection::Incoming, "r1")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, RequestStatus::AcceptedPending);
        assert!(loaded.connection.is_none());
    }

    #[test]
    fn transition_records_connection_ref() {
        let conn = setup_db();
        let record = sample("r1", RequestDirection::Submitted);
        insert_request(&conn, &record).unwrap();

        let reference = record.connection_ref();
        transition_status(
            &conn,
            RequestDirection::Submitted,
            "r1",
            RequestStatus::Created,
            RequestStatus::Accepted,
            Some(&reference),
        )
        .unwrap();

        let loaded = get_request(&conn, RequestDirection::Submitted, "r1")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, RequestStatus::Accepted);
        assert_eq!(loaded.connection, Some(reference));
        assert_eq!(loaded.verification_code, "042917");
    }

    #[test]
    fn transition_on_missing_record_is_noop() {
        let conn = setup_db();
        let moved = transition_status(
            &conn,
            RequestDirection::Incoming,
            "missing",
            RequestStatus::Created,
            RequestStatus::Accepted,
            None,
        )
        .unwrap();
        assert!(!moved);
    }
}
