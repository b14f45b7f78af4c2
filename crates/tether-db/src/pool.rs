//! SQLite connection pooling.
//!
//! Both registries share one pool. Every connection it hands out runs in WAL
//! mode with foreign keys enforced and a busy timeout, so a coordinator
//! blocked behind another writer waits instead of failing with
//! `SQLITE_BUSY`.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use thiserror::Error;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Per-connection settings applied when the pool opens a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    pub busy_timeout: Duration,
    pub pool_max_size: u32,
}

impl DbRuntimeSettings {
    pub fn new(busy_timeout_ms: u64, pool_max_size: u32) -> Self {
        Self {
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            pool_max_size,
        }
    }
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self::new(5_000, 8)
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens (creating if needed) the database at `db_path` behind a pool.
///
/// With `:memory:` each pooled connection sees its own empty database; use a
/// temporary file when state has to be shared.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .with_init(move |conn| configure_connection(conn, settings.busy_timeout));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout.as_millis() as u64,
        "sqlite pool opened"
    );
    Ok(pool)
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // ":memory:" cannot do WAL and reports "memory".
    if !mode.eq_ignore_ascii_case("wal") && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode stayed {}", mode)),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma_i64(conn: &Connection, name: &str) -> i64 {
        conn.query_row(&format!("PRAGMA {};", name), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn pooled_connections_are_configured() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let pool = create_pool(
            file.path().to_str().unwrap(),
            DbRuntimeSettings::new(2_500, 3),
        )
        .unwrap();
        assert_eq!(pool.max_size(), 3);

        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        for conn in [&first, &second] {
            let mode: String = conn
                .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
                .unwrap();
            assert_eq!(mode, "wal");
            assert_eq!(pragma_i64(conn, "foreign_keys"), 1);
            assert_eq!(pragma_i64(conn, "busy_timeout"), 2_500);
        }
    }

    #[test]
    fn default_settings() {
        let settings = DbRuntimeSettings::default();
        assert_eq!(settings.busy_timeout, Duration::from_secs(5));
        assert_eq!(settings.pool_max_size, 8);
    }
}
