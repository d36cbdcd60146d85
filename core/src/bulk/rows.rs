use std::pin::Pin;

use futures::{
    stream::{self, BoxStream, Peekable},
    Stream, StreamExt,
};

use crate::{bulk::error::BulkSyncError, database::sql_value::SqlValue};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Row = Vec<SqlValue>;

/// Rows handed to a loader, already validated against the declared column count.
pub type RowStream<'a> = BoxStream<'a, Result<Row, BulkSyncError>>;

/// Forward only reader over rows with a fixed column list.
pub struct RowReader<'a> {
    columns: Vec<String>,
    stream: Peekable<BoxStream<'a, Result<Row, BoxError>>>,
}

impl<'a> RowReader<'a> {
    pub fn new<S>(columns: Vec<String>, stream: S) -> Self
    where
        S: Stream<Item = Result<Row, BoxError>> + Send + 'a,
    {
        RowReader { columns, stream: stream.boxed().peekable() }
    }

    pub fn from_rows<I>(columns: Vec<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'a,
    {
        Self::new(columns, stream::iter(rows.into_iter().map(Ok)))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Waits for the first row without consuming it. A reader whose first item is an
    /// error counts as having rows so the error is reported by the load.
    pub async fn has_rows(&mut self) -> bool {
        Pin::new(&mut self.stream).peek().await.is_some()
    }

    fn into_stream(self) -> RowStream<'a> {
        let width = self.columns.len();
        self.stream
            .map(move |row| match row {
                Ok(row) => check_width(row, width),
                Err(e) => Err(BulkSyncError::RowSource(e.to_string())),
            })
            .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub values: Row,
    pub state: RowState,
}

/// Materialized rows, each tagged with a change state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<DataRow>,
}

impl RowSet {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        RowSet { columns: columns.into_iter().map(Into::into).collect(), rows: Vec::new() }
    }

    /// Adds a row in the `Added` state.
    pub fn push(&mut self, values: Row) -> &mut Self {
        self.push_with_state(values, RowState::Added)
    }

    pub fn push_with_state(&mut self, values: Row, state: RowState) -> &mut Self {
        self.rows.push(DataRow { values, state });
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_in_state(&self, state: Option<RowState>) -> impl Iterator<Item = &DataRow> + '_ {
        self.rows.iter().filter(move |row| state.map_or(true, |state| row.state == state))
    }
}

/// Input of a bulk operation.
pub enum RowSource<'a> {
    Reader(RowReader<'a>),
    /// Rows of a set, optionally only those in the given state.
    Set { set: &'a RowSet, state: Option<RowState> },
}

impl<'a> RowSource<'a> {
    pub fn filtered(set: &'a RowSet, state: RowState) -> Self {
        RowSource::Set { set, state: Some(state) }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            RowSource::Reader(reader) => reader.columns(),
            RowSource::Set { set, .. } => &set.columns,
        }
    }

    /// True when there is nothing to load. Does not consume any row.
    pub async fn is_empty(&mut self) -> bool {
        match self {
            RowSource::Reader(reader) => !reader.has_rows().await,
            RowSource::Set { set, state } => set.rows_in_state(*state).next().is_none(),
        }
    }

    pub fn into_stream(self) -> RowStream<'a> {
        match self {
            RowSource::Reader(reader) => reader.into_stream(),
            RowSource::Set { set, state } => {
                let width = set.columns.len();
                stream::iter(
                    set.rows_in_state(state).map(move |row| check_width(row.values.clone(), width)),
                )
                .boxed()
            }
        }
    }
}

impl<'a> From<RowReader<'a>> for RowSource<'a> {
    fn from(reader: RowReader<'a>) -> Self {
        RowSource::Reader(reader)
    }
}

impl<'a> From<&'a RowSet> for RowSource<'a> {
    fn from(set: &'a RowSet) -> Self {
        RowSource::Set { set, state: None }
    }
}

fn check_width(row: Row, width: usize) -> Result<Row, BulkSyncError> {
    if row.len() == width {
        Ok(row)
    } else {
        Err(BulkSyncError::RowSource(format!(
            "row has {} values but {} columns were declared",
            row.len(),
            width
        )))
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    fn people() -> RowSet {
        let mut set = RowSet::new(["id", "name"]);
        set.push(vec![SqlValue::Int(1), "ann".into()])
            .push_with_state(vec![SqlValue::Int(2), "bob".into()], RowState::Modified)
            .push_with_state(vec![SqlValue::Int(3), "cy".into()], RowState::Unchanged);
        set
    }

    #[tokio::test]
    async fn test_row_state_filter() {
        let set = people();
        let mut source = RowSource::filtered(&set, RowState::Modified);
        assert!(!source.is_empty().await);

        let rows: Vec<Row> = source.into_stream().try_collect().await.unwrap();
        assert_eq!(rows, vec![vec![SqlValue::Int(2), SqlValue::from("bob")]]);

        let mut deleted = RowSource::filtered(&set, RowState::Deleted);
        assert!(deleted.is_empty().await);
    }

    #[tokio::test]
    async fn test_reader_peek_does_not_consume() {
        let mut source: RowSource<'_> = RowReader::from_rows(
            vec!["a".to_string()],
            vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
        )
        .into();

        assert!(!source.is_empty().await);
        assert_eq!(source.columns().to_vec(), vec!["a".to_string()]);

        let rows: Vec<Row> = source.into_stream().try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_reader() {
        let mut source: RowSource<'_> =
            RowReader::from_rows(vec!["a".to_string()], Vec::<Row>::new()).into();
        assert!(source.is_empty().await);
    }

    #[tokio::test]
    async fn test_width_mismatch_and_stream_errors() {
        let reader = RowReader::new(
            vec!["a".to_string(), "b".to_string()],
            stream::iter(vec![Ok(vec![SqlValue::Int(1)])]),
        );
        let result: Result<Vec<Row>, _> = RowSource::from(reader).into_stream().try_collect().await;
        assert!(matches!(result, Err(BulkSyncError::RowSource(_))));

        let failing = RowReader::new(
            vec!["a".to_string()],
            stream::iter(vec![Err::<Row, BoxError>("socket closed".into())]),
        );
        let result: Result<Vec<Row>, _> =
            RowSource::from(failing).into_stream().try_collect().await;
        match result {
            Err(BulkSyncError::RowSource(message)) => assert_eq!(message, "socket closed"),
            other => panic!("unexpected {:?}", other.map(|rows| rows.len())),
        }
    }
}
