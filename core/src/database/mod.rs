pub mod connection;
pub mod dialect;
pub mod error;
pub mod postgres;
pub mod schema;
pub mod sql_value;
pub mod sqlite;
