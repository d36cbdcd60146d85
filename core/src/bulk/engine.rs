use std::{
    future::Future,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    bulk::{
        error::BulkSyncError,
        fields::{reconcile_fields, ReconcileInput, ReconciledFields, SyncMode},
        loader::{LoadRequest, RowLoader},
        options::{BulkInsertOptions, BulkUpdateOptions},
        query_builder::{ReconcileMode, ReconcilePlan},
        rows::RowSource,
        schema::SchemaCache,
        staging::StagingTable,
        transaction::TransactionScope,
    },
    config::BulkSyncConfig,
    database::{
        connection::{Connection, Transaction},
        schema::TableName,
    },
    types::code::Code,
};

const STAGING_DROP_SAVEPOINT: &str = "bulksync_staging_drop";

/// Runs one I/O step, racing it against cancellation and an optional timeout.
async fn step<T, F>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    future: F,
) -> Result<T, BulkSyncError>
where
    F: Future<Output = Result<T, BulkSyncError>>,
{
    let run = async {
        match timeout {
            Some(after) => tokio::time::timeout(after, future)
                .await
                .map_err(|_| BulkSyncError::Timeout { after })?,
            None => future.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BulkSyncError::Cancelled),
        result = run => result,
    }
}

async fn run_sql<C: Connection + ?Sized>(
    connection: &C,
    sql: &Code,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<u64, BulkSyncError> {
    debug!("{}", sql);
    step(cancel, timeout, async { Ok(connection.execute(sql.as_str()).await?) }).await
}

/// Bulk insert, update, merge and truncate on any [`Connection`], loading rows
/// with `L`.
#[derive(Clone)]
pub struct BulkSync<L> {
    loader: L,
    schema: SchemaCache,
    config: BulkSyncConfig,
}

impl<L> BulkSync<L> {
    pub fn new(loader: L, config: BulkSyncConfig) -> Self {
        BulkSync { loader, schema: SchemaCache::new(&config.schema_cache), config }
    }

    pub fn config(&self) -> &BulkSyncConfig {
        &self.config
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema
    }

    fn batch_size(&self, options: &BulkInsertOptions) -> usize {
        options.batch_size.unwrap_or(self.config.batch_size).max(1)
    }

    fn timeout(&self, options: &BulkInsertOptions) -> Option<Duration> {
        options.timeout.or_else(|| self.config.timeout())
    }

    /// Appends rows to `table`. Returns the number of rows written.
    pub async fn bulk_insert<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'_>>,
        options: &BulkInsertOptions,
        transaction: Option<&Transaction<'c, C>>,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let started = Instant::now();
        let mut rows = rows.into();
        if is_empty(&mut rows, cancel).await? {
            debug!("Bulk insert into {} skipped, no rows", table);
            return Ok(0);
        }

        if cancel.is_cancelled() {
            return Err(BulkSyncError::Cancelled);
        }
        let scope = TransactionScope::resolve(connection, transaction).await?;
        let outcome = self.insert_rows(connection, table, rows, options, cancel).await;
        let result = finish(scope, outcome, cancel).await;

        log_outcome("insert", table, started, &result);
        result
    }

    async fn insert_rows<C>(
        &self,
        connection: &C,
        table: &TableName,
        rows: RowSource<'_>,
        options: &BulkInsertOptions,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let source_columns = rows.columns().to_vec();
        let target = step(
            cancel,
            None,
            self.schema.get_columns(connection, table, options.force_schema_refresh),
        )
        .await?;

        let fields = reconcile_fields(&ReconcileInput {
            table,
            target: &target,
            source_columns: &source_columns,
            mappings: &options.mappings,
            qualifiers: &[],
            keep_identity: options.keep_identity,
            mode: SyncMode::Insert,
        })?;

        if options.hints.is_some() {
            debug!("Hints are not applied to direct loads into {}", table);
        }

        let request = LoadRequest {
            destination: table,
            plan: &fields.load_plan,
            batch_size: self.batch_size(options),
            identity_insert: fields.inserts_identity(),
        };
        let mut stream = rows.into_stream();
        step(cancel, self.timeout(options), self.loader.load(connection, &mut stream, &request))
            .await
    }

    /// Updates the rows of `table` matching the staged rows on the qualifier
    /// columns. Returns the number of target rows updated.
    pub async fn bulk_update<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'_>>,
        options: &BulkUpdateOptions,
        transaction: Option<&Transaction<'c, C>>,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        self.reconcile(connection, table, rows.into(), options, ReconcileMode::Update, transaction, cancel)
            .await
    }

    /// Updates matching rows of `table` and inserts the rest. Returns the number of
    /// target rows updated or inserted.
    pub async fn bulk_merge<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        rows: impl Into<RowSource<'_>>,
        options: &BulkUpdateOptions,
        transaction: Option<&Transaction<'c, C>>,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        self.reconcile(connection, table, rows.into(), options, ReconcileMode::Merge, transaction, cancel)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        mut rows: RowSource<'_>,
        options: &BulkUpdateOptions,
        mode: ReconcileMode,
        transaction: Option<&Transaction<'c, C>>,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let started = Instant::now();
        let operation = operation_name(mode);
        if is_empty(&mut rows, cancel).await? {
            debug!("Bulk {} of {} skipped, no rows", operation, table);
            return Ok(0);
        }

        if cancel.is_cancelled() {
            return Err(BulkSyncError::Cancelled);
        }
        let scope = TransactionScope::resolve(connection, transaction).await?;
        let outcome = self.stage_and_reconcile(connection, table, rows, options, mode, cancel).await;
        let result = finish(scope, outcome, cancel).await;

        log_outcome(operation, table, started, &result);
        result
    }

    async fn stage_and_reconcile<C>(
        &self,
        connection: &C,
        table: &TableName,
        rows: RowSource<'_>,
        options: &BulkUpdateOptions,
        mode: ReconcileMode,
        cancel: &CancellationToken,
    ) -> Result<u64, BulkSyncError>
    where
        C: Connection + ?Sized,
        L: RowLoader<C>,
    {
        let insert = &options.insert;
        let timeout = self.timeout(insert);
        let dialect = connection.dialect();

        let source_columns = rows.columns().to_vec();
        let target = step(
            cancel,
            None,
            self.schema.get_columns(connection, table, insert.force_schema_refresh),
        )
        .await?;

        let fields: ReconciledFields = reconcile_fields(&ReconcileInput {
            table,
            target: &target,
            source_columns: &source_columns,
            mappings: &insert.mappings,
            qualifiers: &options.qualifiers,
            keep_identity: insert.keep_identity,
            mode: match mode {
                ReconcileMode::Update => SyncMode::Update,
                ReconcileMode::Merge => SyncMode::Merge,
            },
        })?;

        let physical = options.use_physical_staging.unwrap_or(self.config.use_physical_staging);
        let staging = StagingTable::for_target(table, physical);

        run_sql(connection, &staging.drop_sql(dialect), cancel, None).await?;
        run_sql(connection, &staging.create_sql(dialect, &fields.columns), cancel, None).await?;

        let request = LoadRequest {
            destination: &staging.name,
            plan: &fields.load_plan,
            batch_size: self.batch_size(insert),
            identity_insert: false,
        };
        let mut stream = rows.into_stream();
        let loaded =
            step(cancel, timeout, self.loader.load(connection, &mut stream, &request)).await?;
        debug!("Staged {} rows in {}", loaded, staging.name);

        run_sql(connection, &staging.index_sql(dialect, &fields.qualifiers), cancel, None).await?;

        let plan = ReconcilePlan {
            target: table,
            staging: &staging.name,
            columns: &fields.columns,
            qualifiers: &fields.qualifiers,
            keep_identity: fields.keep_identity,
            mode,
            hints: insert.hints.as_deref(),
        };
        let mut affected = 0;
        for statement in dialect.reconcile_statements(&plan) {
            affected += run_sql(connection, &statement, cancel, timeout).await?;
        }

        drop_staging(connection, &staging, cancel).await?;
        Ok(affected)
    }

    /// Removes every row of `table`.
    pub async fn truncate<'c, C>(
        &self,
        connection: &'c C,
        table: &TableName,
        transaction: Option<&Transaction<'c, C>>,
        cancel: &CancellationToken,
    ) -> Result<(), BulkSyncError>
    where
        C: Connection + ?Sized,
    {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(BulkSyncError::Cancelled);
        }

        let scope = TransactionScope::resolve(connection, transaction).await?;
        let statement = connection.dialect().truncate_sql(table);
        let outcome = run_sql(connection, &statement, cancel, self.config.timeout()).await;
        let result = finish(scope, outcome, cancel).await.map(|_| ());

        match &result {
            Ok(()) => info!("Truncated {} - took {:?}", table, started.elapsed()),
            Err(e) => error!("Error truncating {}: {}", table, e),
        }
        result
    }
}

async fn is_empty(rows: &mut RowSource<'_>, cancel: &CancellationToken) -> Result<bool, BulkSyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BulkSyncError::Cancelled),
        empty = rows.is_empty() => Ok(empty),
    }
}

/// A cancellation that lands after the last step still rolls back an owned
/// transaction.
async fn finish<C: Connection + ?Sized>(
    scope: TransactionScope<'_, '_, C>,
    outcome: Result<u64, BulkSyncError>,
    cancel: &CancellationToken,
) -> Result<u64, BulkSyncError> {
    let outcome = match outcome {
        Ok(_) if cancel.is_cancelled() => Err(BulkSyncError::Cancelled),
        outcome => outcome,
    };
    scope.finish(outcome).await
}

/// Drops the staging table inside a savepoint. A failing drop is rolled back to
/// the savepoint and reported as a warning only.
async fn drop_staging<C: Connection + ?Sized>(
    connection: &C,
    staging: &StagingTable,
    cancel: &CancellationToken,
) -> Result<(), BulkSyncError> {
    let dialect = connection.dialect();
    let savepoint = Code::new(dialect.savepoint_sql(STAGING_DROP_SAVEPOINT));
    run_sql(connection, &savepoint, cancel, None).await?;

    match run_sql(connection, &staging.drop_sql(dialect), cancel, None).await {
        Ok(_) => {
            let release = Code::new(dialect.release_savepoint_sql(STAGING_DROP_SAVEPOINT));
            run_sql(connection, &release, cancel, None).await?;
        }
        Err(BulkSyncError::Cancelled) => return Err(BulkSyncError::Cancelled),
        Err(e) => {
            warn!("Could not drop staging table {}: {}", staging.name, e);
            let rollback = Code::new(dialect.rollback_to_savepoint_sql(STAGING_DROP_SAVEPOINT));
            run_sql(connection, &rollback, cancel, None).await?;
        }
    }

    Ok(())
}

fn operation_name(mode: ReconcileMode) -> &'static str {
    match mode {
        ReconcileMode::Update => "update",
        ReconcileMode::Merge => "merge",
    }
}

fn log_outcome(operation: &str, table: &TableName, started: Instant, result: &Result<u64, BulkSyncError>) {
    match result {
        Ok(rows) => {
            info!("Bulk {} into {} - {} rows - took {:?}", operation, table, rows, started.elapsed())
        }
        Err(e) => error!("Error running bulk {} into {}: {}", operation, table, e),
    }
}
