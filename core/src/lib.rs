// public
pub mod blocking;
pub mod bulk;
pub mod config;
pub mod database;

pub use blocking::BlockingBulkSync;
pub use bulk::{
    BulkInsertOptions, BulkSync, BulkSyncError, BulkUpdateOptions, ColumnMapping, InsertLoader,
    PostgresCopyLoader, RowLoader, RowReader, RowSet, RowSource, RowState,
};
pub use config::{read_config, BulkSyncConfig, ConfigError};
pub use database::{
    connection::{Connection, ConnectionId, Transaction, TransactionState},
    error::DatabaseError,
    postgres::client::{PostgresClient, PostgresConnection},
    schema::{ColumnDescriptor, TableName},
    sql_value::SqlValue,
    sqlite::client::SqliteConnection,
};

mod simple_file_formatters;
pub use simple_file_formatters::csv::{read_csv_rows, CsvSourceError};

mod logger;
pub use logger::{parse_log_level, setup_info_logger, setup_logger, setup_test_logger};

mod types;
pub use types::code::Code;

// export 3rd party dependencies
pub use async_trait::async_trait;
pub use tokio_postgres::types::Type as PgType;
pub use tokio_util::sync::CancellationToken;
pub use tracing::level_filters::LevelFilter;
