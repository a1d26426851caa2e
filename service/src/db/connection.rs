//! Connection pooling and pragma configuration

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::migrations::migrate_to_latest;
use super::{DbError, DbPool, Result};

/// Initialize a connection pool for `db_path`.
///
/// Every pooled connection gets WAL mode, foreign keys, and a busy timeout
/// so concurrent writers queue on the database lock instead of failing
/// with `SQLITE_BUSY`.
pub fn initialize_pool(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| apply_pragmas(conn, busy_timeout));

    Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| DbError::Pool(format!("Failed to build pool: {e}")))
}

/// Create the parent directory, build the pool, and migrate the schema.
pub fn open_database(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<DbPool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let pool = initialize_pool(db_path, pool_size, busy_timeout)?;
    let mut conn = pool
        .get()
        .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
    migrate_to_latest(&mut conn)?;
    tracing::debug!(path = %db_path.display(), "database ready");
    Ok(pool)
}

fn apply_pragmas(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}
