use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::{
    bulk::{
        BulkInsertOptions, BulkSync, BulkSyncError, BulkUpdateOptions, RowLoader, RowSource,
    },
    config::BulkSyncConfig,
    database::{
        connection::{Connection, Transaction},
        schema::TableName,
    },
};

/// Synchronous front of [`BulkSync`], driven by a private current thread runtime.
///
/// Connections used with it must be opened through [`BlockingBulkSync::block_on`]
/// so their background tasks live on the same runtime.
pub struct BlockingBulkSync<L> {
    inner: BulkSync<L>,
    runtime: Runtime,
}

impl<L> BlockingBulkSync<L> {
    pub fn new(loader: L, config: BulkSyncConfig) -> Result<Self, std::io::Error> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(BlockingBulkSync { inner: BulkSync::new(loader, config), runtime })
    }

    pub fn inner(&self) -> &BulkSync<L> {
        &self.inner
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn begin<'c, C>(&self, connection: &'c C) -> Result<Transaction<'c, C>, BulkSyncError>
    where
        C: Connection + ?Sized,
    {
        Ok(self.block_on(Transaction::begin(connection))?)
    }

    pub fn bulk_insert<'c, 'r, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'r>>,
        options: &BulkInsertOptions,
        transaction: Option<&Transaction<'c, C>>,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let never = CancellationToken::new();
        self.block_on(self.inner.bulk_insert(connection, table, rows, options, transaction, &never))
    }

    pub fn bulk_update<'c, 'r, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'r>>,
        options: &BulkUpdateOptions,
        transaction: Option<&Transaction<'c, C>>,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let never = CancellationToken::new();
        self.block_on(self.inner.bulk_update(connection, table, rows, options, transaction, &never))
    }

    pub fn bulk_merge<'c, 'r, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'r>>,
        options: &BulkUpdateOptions,
        transaction: Option<&Transaction<'c, C>>,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let never = CancellationToken::new();
        self.block_on(self.inner.bulk_merge(connection, table, rows, options, transaction, &never))
    }

    pub fn truncate<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        transaction: Option<&Transaction<'c, C>>,
    ) -> Result<(), BulkSyncError>
    where
        C: Connection + ?Sized,
    {
        let never = CancellationToken::new();
        self.block_on(self.inner.truncate(connection, table, transaction, &never))
    }
}
