use tracing::{debug, error};

use crate::{
    bulk::error::BulkSyncError,
    database::connection::{Connection, Transaction, TransactionClaim},
};

/// The transaction a bulk operation runs in.
pub enum TransactionScope<'t, 'c, C: Connection + ?Sized> {
    /// Started by the engine, committed or rolled back when the operation ends.
    Owned(Transaction<'c, C>),
    /// Supplied by the caller, held exclusively for the duration of the operation
    /// and left open afterwards.
    Borrowed { transaction: &'t Transaction<'c, C>, claim: TransactionClaim<'t> },
}

impl<'t, 'c, C: Connection + ?Sized> TransactionScope<'t, 'c, C> {
    pub async fn resolve(
        connection: &'c C,
        supplied: Option<&'t Transaction<'c, C>>,
    ) -> Result<Self, BulkSyncError> {
        match supplied {
            Some(transaction) => {
                if transaction.connection_id() != connection.id() {
                    return Err(BulkSyncError::TransactionMismatch);
                }
                let claim = transaction.claim().ok_or(BulkSyncError::TransactionInUse)?;
                Ok(TransactionScope::Borrowed { transaction, claim })
            }
            None => Ok(TransactionScope::Owned(Transaction::begin(connection).await?)),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, TransactionScope::Owned(_))
    }

    /// Commits an owned transaction on success and rolls it back on failure. A
    /// failing rollback is logged and the original error is returned. Borrowed
    /// transactions are released untouched.
    pub async fn finish<T>(self, outcome: Result<T, BulkSyncError>) -> Result<T, BulkSyncError> {
        match self {
            TransactionScope::Owned(transaction) => match outcome {
                Ok(value) => {
                    transaction.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    debug!("Rolling back bulk operation after: {}", e);
                    if let Err(rollback_error) = transaction.rollback().await {
                        error!("Error rolling back bulk operation: {}", rollback_error);
                    }
                    Err(e)
                }
            },
            TransactionScope::Borrowed { transaction, claim } => {
                drop(claim);
                debug!(
                    "Leaving caller transaction on connection {:?} open",
                    transaction.connection_id()
                );
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{connection::TransactionState, sqlite::client::SqliteConnection};

    #[tokio::test]
    async fn test_owned_scope_commits_on_success() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (id INTEGER);").await.unwrap();

        let scope = TransactionScope::resolve(&conn, None).await.unwrap();
        assert!(scope.is_owned());
        conn.execute("INSERT INTO t VALUES (1);").await.unwrap();
        assert_eq!(scope.finish(Ok(1)).await.unwrap(), 1);

        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0][0].as_i64(), Some(1));
    }

    #[tokio::test]
    async fn test_owned_scope_rolls_back_and_keeps_error() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (id INTEGER);").await.unwrap();

        let scope = TransactionScope::resolve(&conn, None).await.unwrap();
        conn.execute("INSERT INTO t VALUES (1);").await.unwrap();
        let result: Result<u64, _> = scope.finish(Err(BulkSyncError::Cancelled)).await;
        assert!(matches!(result, Err(BulkSyncError::Cancelled)));

        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0][0].as_i64(), Some(0));
    }

    #[tokio::test]
    async fn test_borrowed_scope_is_exclusive_and_left_open() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        let transaction = Transaction::begin(&conn).await.unwrap();

        let scope = TransactionScope::resolve(&conn, Some(&transaction)).await.unwrap();
        assert!(!scope.is_owned());
        assert!(matches!(
            TransactionScope::resolve(&conn, Some(&transaction)).await,
            Err(BulkSyncError::TransactionInUse)
        ));

        let result: Result<u64, _> = scope.finish(Err(BulkSyncError::Cancelled)).await;
        assert!(result.is_err());
        assert_eq!(transaction.state(), TransactionState::Active);
        assert!(TransactionScope::resolve(&conn, Some(&transaction)).await.is_ok());

        transaction.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_from_other_connection_is_rejected() {
        let first = SqliteConnection::open_in_memory().await.unwrap();
        let second = SqliteConnection::open_in_memory().await.unwrap();
        let transaction = Transaction::begin(&first).await.unwrap();

        assert!(matches!(
            TransactionScope::resolve(&second, Some(&transaction)).await,
            Err(BulkSyncError::TransactionMismatch)
        ));

        transaction.rollback().await.unwrap();
    }
}
