use std::time::Duration;

use crate::database::error::DatabaseError;

#[derive(thiserror::Error, Debug)]
pub enum BulkSyncError {
    #[error("No columns of table '{table}' match the source columns")]
    NoFields { table: String },

    #[error("Table '{table}' has no primary key or identity column and no qualifiers were given")]
    MissingKey { table: String },

    #[error("Qualifier '{column}' is not a column loaded into table '{table}'")]
    UnknownQualifier { table: String, column: String },

    #[error("The transaction does not belong to the connection it was passed with")]
    TransactionMismatch,

    #[error("The transaction is already used by another bulk operation")]
    TransactionInUse,

    #[error("Could not read the schema of table '{table}': {reason}")]
    SchemaLookup { table: String, reason: String },

    #[error("Invalid column mapping '{source_column}' -> '{destination_column}'")]
    InvalidMapping { source_column: String, destination_column: String },

    #[error("Every column loaded into '{table}' is a key column, there is nothing to update")]
    NothingToUpdate { table: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Bulk operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Bulk operation was cancelled")]
    Cancelled,

    #[error("Row source error: {0}")]
    RowSource(String),
}
