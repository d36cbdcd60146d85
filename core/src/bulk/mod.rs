mod engine;
pub use engine::BulkSync;

pub mod error;
pub mod fields;
pub mod loader;
pub mod options;
pub mod query_builder;
pub mod rows;
pub mod schema;
pub mod staging;
pub mod transaction;

pub use error::BulkSyncError;
pub use loader::{InsertLoader, PostgresCopyLoader, RowLoader};
pub use options::{BulkInsertOptions, BulkUpdateOptions, ColumnMapping};
pub use rows::{RowReader, RowSet, RowSource, RowState};
