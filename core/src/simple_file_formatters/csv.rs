use std::{
    fs::File,
    path::{Path, PathBuf},
};

use csv::{Reader, StringRecord};
use futures::stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    bulk::rows::{BoxError, Row, RowReader},
    database::sql_value::SqlValue,
};

/// Rows buffered between the blocking csv reader and the load.
const CSV_CHANNEL_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum CsvSourceError {
    #[error("Could not read csv file: {0}")]
    Csv(#[from] csv::Error),

    #[error("Csv file {0} has no header row")]
    MissingHeader(String),

    #[error("Blocking csv task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),
}

/// Empty cells are NULL, everything else is text converted on encode.
fn record_to_row(record: &StringRecord) -> Row {
    record
        .iter()
        .map(|cell| if cell.is_empty() { SqlValue::Null } else { SqlValue::Text(cell.to_string()) })
        .collect()
}

fn open(path: PathBuf) -> Result<(Vec<String>, Reader<File>), CsvSourceError> {
    let mut reader = Reader::from_path(&path)?;
    let header: Vec<String> =
        reader.headers()?.iter().map(|column| column.trim().to_string()).collect();

    if header.is_empty() || header.iter().all(String::is_empty) {
        return Err(CsvSourceError::MissingHeader(path.display().to_string()));
    }

    Ok((header, reader))
}

/// Streams a csv file as rows, the header row naming the source columns. The
/// file is read on the blocking pool while the load consumes earlier rows.
pub async fn read_csv_rows(path: &Path) -> Result<RowReader<'static>, CsvSourceError> {
    let path = path.to_path_buf();
    let (header, mut reader) = tokio::task::spawn_blocking(move || open(path)).await??;
    debug!("Csv source columns: {:?}", header);

    let (sender, receiver) = mpsc::channel::<Result<Row, BoxError>>(CSV_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || {
        for record in reader.records() {
            let item = record.map(|record| record_to_row(&record)).map_err(BoxError::from);
            let failed = item.is_err();
            // the receiver is gone when the load stopped early
            if sender.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });

    let rows = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    });

    Ok(RowReader::new(header, rows))
}
