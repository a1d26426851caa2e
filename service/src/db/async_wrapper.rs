//! Async bridge for sync SQLite work.
//!
//! SQLite calls block, so they run on Tokio's blocking pool with a pooled
//! connection instead of on an async worker.

use rusqlite::Connection;

use super::{DbError, DbPool};

/// Run `f` with a pooled connection on the blocking thread pool.
///
/// # Example
/// ```rust,no_run
/// # use milestone_service::db::{DbError, DbPool, with_connection};
/// # async fn example(pool: &DbPool) -> Result<i64, DbError> {
/// let count: i64 = with_connection(pool, |conn| {
///     Ok::<_, DbError>(conn.query_row("SELECT COUNT(*) FROM milestones", [], |row| row.get(0))?)
/// })
/// .await?;
/// # Ok(count)
/// # }
/// ```
pub async fn with_connection<F, T, E>(pool: &DbPool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DbError> + Send + 'static,
{
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| DbError::Transaction(format!("Task join error: {e}")))?
}
