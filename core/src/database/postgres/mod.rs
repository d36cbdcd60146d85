pub mod client;
pub mod generate;
pub mod schema;
