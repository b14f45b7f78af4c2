//! Database layer for Tether.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and the persistent instance identity. Every table
//! is created through versioned migrations managed by this crate.
//!
//! SQLite in WAL mode lets the HTTP handlers read concurrently while a single
//! writer commits handshake and stream transitions.

mod instance;
mod migrations;
mod pool;

pub use instance::load_or_create_instance_id;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
