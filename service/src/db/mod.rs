//! SQLite persistence layer.
//!
//! - Connection pooling (r2d2-sqlite) with WAL + busy timeout
//! - ACID transaction helper
//! - Forward-only schema migrations
//! - Async bridge via `spawn_blocking`

pub mod async_wrapper;
pub mod connection;
pub mod migrations;
pub mod transactions;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub use async_wrapper::with_connection;
pub use connection::{initialize_pool, open_database};
pub use transactions::execute_in_transaction;

/// Shared connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted row could not be decoded into a domain value.
    #[error("corrupt {table} row {id}: {reason}")]
    Decode {
        table: &'static str,
        id: String,
        reason: String,
    },

    /// The conditional write matched no row: the version changed between
    /// read and write.
    #[error("stale write to {table} {id}: expected version {expected}")]
    StaleVersion {
        table: &'static str,
        id: String,
        expected: i64,
    },
}
