//! ACID transaction helper

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Execute `operation` within a transaction.
///
/// Commits when the closure returns `Ok`; any `Err` drops the transaction,
/// which rolls it back. `Immediate` takes the write lock up front, so a
/// read-decide-write sequence inside the closure cannot interleave with
/// another writer.
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE test_data (
                id INTEGER PRIMARY KEY,
                value INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        conn
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM test_data", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_transaction_commit() {
        let mut conn = setup_test_db();

        let result: Result<(), DbError> =
            execute_in_transaction(&mut conn, TransactionBehavior::Immediate, |tx| {
                tx.execute("INSERT INTO test_data (value) VALUES (?1)", [42])?;
                Ok(())
            });

        assert!(result.is_ok(), "Transaction should commit successfully");
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_transaction_rollback() {
        let mut conn = setup_test_db();

        let result: Result<(), DbError> =
            execute_in_transaction(&mut conn, TransactionBehavior::Immediate, |tx| {
                tx.execute("INSERT INTO test_data (value) VALUES (?1)", [1])?;
                tx.execute("INSERT INTO test_data (value) VALUES (?1)", [2])?;
                Err(DbError::Transaction("Intentional error".to_string()))
            });

        assert!(result.is_err(), "Transaction should fail");
        assert_eq!(count(&conn), 0, "Rolled back data should not persist");
    }
}
