use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::database::{
    dialect::Dialect,
    error::DatabaseError,
    schema::{ColumnDescriptor, TableName},
    sql_value::SqlValue,
};

/// Process-unique identity of an open connection. Transactions carry the id of
/// the connection they were started on so they can be matched later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One open session against a database. All statements issued through the same
/// value run on the same server session.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn dialect(&self) -> &'static dyn Dialect;

    /// Identifies the database this connection talks to; used to scope cached schemas.
    fn cache_key(&self) -> String;

    async fn batch_execute(&self, sql: &str) -> Result<(), DatabaseError>;

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError>;

    async fn execute_with_params(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, DatabaseError>;

    async fn fetch_columns(&self, table: &TableName)
        -> Result<Vec<ColumnDescriptor>, DatabaseError>;

    /// Best effort rollback for a transaction that was dropped while still open.
    /// Must not block the caller.
    fn discard_transaction(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// An open transaction on a borrowed connection.
///
/// A transaction dropped while still active is discarded by its connection.
pub struct Transaction<'c, C: Connection + ?Sized> {
    connection: &'c C,
    connection_id: ConnectionId,
    state: TransactionState,
    in_use: AtomicBool,
}

impl<'c, C: Connection + ?Sized> Transaction<'c, C> {
    pub async fn begin(connection: &'c C) -> Result<Self, DatabaseError> {
        connection.batch_execute(connection.dialect().begin_sql()).await?;
        debug!("Transaction started on connection {:?}", connection.id());

        Ok(Transaction {
            connection,
            connection_id: connection.id(),
            state: TransactionState::Active,
            in_use: AtomicBool::new(false),
        })
    }

    pub fn connection(&self) -> &'c C {
        self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        self.connection.execute(sql).await
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.connection.batch_execute(sql).await
    }

    pub async fn commit(mut self) -> Result<(), DatabaseError> {
        self.connection.batch_execute(self.connection.dialect().commit_sql()).await?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), DatabaseError> {
        self.connection.batch_execute(self.connection.dialect().rollback_sql()).await?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Marks the transaction as in use for the lifetime of the returned guard.
    /// Returns `None` when another call already holds it.
    pub fn claim(&self) -> Option<TransactionClaim<'_>> {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransactionClaim { in_use: &self.in_use })
    }
}

impl<'c, C: Connection + ?Sized> Drop for Transaction<'c, C> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            warn!(
                "Transaction on connection {:?} dropped without commit or rollback, discarding",
                self.connection_id
            );
            self.connection.discard_transaction();
        }
    }
}

pub struct TransactionClaim<'t> {
    in_use: &'t AtomicBool,
}

impl Drop for TransactionClaim<'_> {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
    }
}
