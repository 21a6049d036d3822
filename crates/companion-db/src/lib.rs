//! Database layer for the companion backend.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table used by the backend is created
//! through versioned migrations managed by this crate.
//!
//! SQLite with WAL mode fits the single-server deployment: concurrent
//! readers with one writer matches the access pattern of a per-request
//! read/write workload, and no external database process is required.
//! Migrations are compiled into the binary via `include_str!` so they ship
//! with the server and cannot drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{open_pool, DbPool, PoolError, PoolSettings};
