use async_trait::async_trait;
use bytes::Bytes;
use futures::{pin_mut, stream, StreamExt};
use tokio_postgres::{binary_copy::BinaryCopyInWriter, types::ToSql};
use tracing::debug;

use crate::{
    bulk::{
        error::BulkSyncError,
        fields::LoadColumn,
        rows::{Row, RowStream},
    },
    database::{
        connection::Connection,
        error::DatabaseError,
        postgres::{client::PostgresConnection, generate::copy_in_sql},
        schema::TableName,
        sql_value::SqlValue,
    },
};

/// Batches of this size or smaller are inserted with plain statements, a COPY
/// round trip does not pay off below it.
pub const COPY_THRESHOLD: usize = 100;

/// Where and how a load writes its rows.
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub destination: &'a TableName,
    pub plan: &'a [LoadColumn],
    /// Rows per statement or COPY.
    pub batch_size: usize,
    /// Write explicit values into the destination's identity column.
    pub identity_insert: bool,
}

impl LoadRequest<'_> {
    pub fn destination_columns(&self) -> Vec<String> {
        self.plan.iter().map(|column| column.destination.clone()).collect()
    }
}

/// Moves rows from a stream into a table on a given connection.
#[async_trait]
pub trait RowLoader<C: Connection + ?Sized>: Send + Sync {
    /// Returns the number of rows written.
    async fn load(
        &self,
        connection: &C,
        rows: &mut RowStream<'_>,
        request: &LoadRequest<'_>,
    ) -> Result<u64, BulkSyncError>;
}

fn project<'p>(row: &Row, plan: &'p [LoadColumn]) -> impl Iterator<Item = SqlValue> + 'p {
    let row = row.clone();
    plan.iter().map(move |column| row.get(column.source_index).cloned().unwrap_or(SqlValue::Null))
}

/// Multi-row parameterized `INSERT`, works on every backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertLoader;

impl InsertLoader {
    async fn flush<C: Connection + ?Sized>(
        connection: &C,
        request: &LoadRequest<'_>,
        columns: &[String],
        rows: usize,
        params: &[SqlValue],
    ) -> Result<u64, BulkSyncError> {
        let sql = connection.dialect().insert_values_sql(
            request.destination,
            columns,
            rows,
            request.identity_insert,
        );
        Ok(connection.execute_with_params(sql.as_str(), params).await?)
    }
}

#[async_trait]
impl<C: Connection + ?Sized> RowLoader<C> for InsertLoader {
    async fn load(
        &self,
        connection: &C,
        rows: &mut RowStream<'_>,
        request: &LoadRequest<'_>,
    ) -> Result<u64, BulkSyncError> {
        let columns = request.destination_columns();
        let width = columns.len().max(1);
        let rows_per_statement =
            (connection.dialect().max_parameters() / width).min(request.batch_size).max(1);

        let mut total = 0;
        let mut params: Vec<SqlValue> = Vec::with_capacity(rows_per_statement * width);
        let mut pending = 0;

        while let Some(row) = rows.next().await {
            params.extend(project(&row?, request.plan));
            pending += 1;

            if pending == rows_per_statement {
                total += Self::flush(connection, request, &columns, pending, &params).await?;
                params.clear();
                pending = 0;
            }
        }

        if pending > 0 {
            total += Self::flush(connection, request, &columns, pending, &params).await?;
        }

        Ok(total)
    }
}

/// Binary `COPY ... FROM STDIN`, one COPY per batch. Small loads fall back to
/// [`InsertLoader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCopyLoader;

#[async_trait]
impl RowLoader<PostgresConnection> for PostgresCopyLoader {
    async fn load(
        &self,
        connection: &PostgresConnection,
        rows: &mut RowStream<'_>,
        request: &LoadRequest<'_>,
    ) -> Result<u64, BulkSyncError> {
        let mut buffered: Vec<Row> = Vec::with_capacity(COPY_THRESHOLD + 1);
        while buffered.len() <= COPY_THRESHOLD {
            match rows.next().await {
                Some(row) => buffered.push(row?),
                None => break,
            }
        }

        if buffered.len() <= COPY_THRESHOLD {
            let mut small: RowStream<'_> = stream::iter(buffered.into_iter().map(Ok)).boxed();
            return InsertLoader.load(connection, &mut small, request).await;
        }

        let columns = request.destination_columns();
        let column_types = connection.column_types(request.destination, &columns).await?;
        let statement = copy_in_sql(request.destination, &columns);
        debug!("Bulk insert statement: {}", statement);

        let batch_size = request.batch_size.max(1);
        let mut all_rows = stream::iter(buffered.into_iter().map(Ok)).chain(rows);
        let mut total = 0;

        loop {
            let first = match all_rows.next().await {
                Some(row) => row?,
                None => break,
            };

            let sink = connection.copy_in::<Bytes>(statement.as_str()).await?;
            let writer = BinaryCopyInWriter::new(sink, &column_types);
            pin_mut!(writer);

            let mut next = Some(first);
            let mut written = 0;
            while let Some(row) = next.take() {
                let values: Vec<SqlValue> = project(&row, request.plan).collect();
                let params: Vec<&(dyn ToSql + Sync)> =
                    values.iter().map(|value| value as &(dyn ToSql + Sync)).collect();
                writer.as_mut().write(&params).await.map_err(DatabaseError::from)?;
                written += 1;

                if written < batch_size {
                    if let Some(row) = all_rows.next().await {
                        next = Some(row?);
                    }
                }
            }

            total += writer.finish().await.map_err(DatabaseError::from)?;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::client::SqliteConnection;

    fn plan(entries: &[(usize, &str)]) -> Vec<LoadColumn> {
        entries
            .iter()
            .map(|(source_index, destination)| LoadColumn {
                source_index: *source_index,
                destination: destination.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_insert_loader_chunks_by_batch_size() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE items (id INTEGER, label TEXT);").await.unwrap();

        let rows: Vec<Result<Row, BulkSyncError>> = (0..25)
            .map(|i| Ok(vec![SqlValue::from(format!("label {}", i)), SqlValue::Int(i)]))
            .collect();
        let mut stream: RowStream<'_> = stream::iter(rows).boxed();

        let table = TableName::parse("items");
        let plan = plan(&[(1, "id"), (0, "label")]);
        let request =
            LoadRequest { destination: &table, plan: &plan, batch_size: 10, identity_insert: false };

        let loaded = InsertLoader.load(&conn, &mut stream, &request).await.unwrap();
        assert_eq!(loaded, 25);

        let rows = conn.query("SELECT id, label FROM items WHERE id = 24").await.unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Int(24), SqlValue::from("label 24")]]);
    }

    #[tokio::test]
    async fn test_insert_loader_stops_on_row_error() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE items (id INTEGER);").await.unwrap();

        let rows: Vec<Result<Row, BulkSyncError>> = vec![
            Ok(vec![SqlValue::Int(1)]),
            Err(BulkSyncError::RowSource("bad row".to_string())),
        ];
        let mut stream: RowStream<'_> = stream::iter(rows).boxed();

        let table = TableName::parse("items");
        let plan = plan(&[(0, "id")]);
        let request =
            LoadRequest { destination: &table, plan: &plan, batch_size: 100, identity_insert: false };

        let result = InsertLoader.load(&conn, &mut stream, &request).await;
        assert!(matches!(result, Err(BulkSyncError::RowSource(_))));
    }

    #[tokio::test]
    async fn test_empty_stream_loads_nothing() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        let mut stream: RowStream<'_> = stream::empty().boxed();
        let table = TableName::parse("not_touched");
        let plan = plan(&[(0, "id")]);
        let request =
            LoadRequest { destination: &table, plan: &plan, batch_size: 100, identity_insert: false };

        assert_eq!(InsertLoader.load(&conn, &mut stream, &request).await.unwrap(), 0);
    }
}
