use bb8::RunError;

/// Driver level failure. Errors from the underlying client are wrapped unchanged.
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("PgError {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(#[from] RunError<tokio_postgres::Error>),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Blocking database task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),

    #[error("{0} is not supported by the {1} backend")]
    Unsupported(&'static str, &'static str),
}
