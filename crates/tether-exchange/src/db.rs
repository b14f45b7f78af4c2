//! Bridge from async operations to the synchronous registries.

use crate::error::ExchangeError;
use rusqlite::Connection;
use tether_db::DbPool;

/// Runs `f` on the blocking pool with a pooled connection.
///
/// Registry calls are short single-record statements, but SQLite I/O still
/// must not run on the async executor.
pub(crate) async fn with_conn<T, F>(pool: &DbPool, f: F) -> Result<T, ExchangeError>
where
    F: FnOnce(&Connection) -> Result<T, ExchangeError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&*conn)
    })
    .await?
}
