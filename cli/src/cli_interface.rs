use std::path::PathBuf;

use bulksync::ColumnMapping;
use clap::{Args, Parser, Subcommand};

#[allow(clippy::upper_case_acronyms)]
#[derive(Parser, Debug)]
#[clap(name = "bulksync", about, version)]
pub struct CLI {
    #[clap(subcommand)]
    pub command: Commands,

    #[clap(flatten)]
    pub connection: ConnectionArgs,

    /// optional - log level: error, warn, info, debug or trace.
    #[clap(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// optional - PostgreSQL connection string, defaults to DATABASE_URL.
    #[clap(long, global = true)]
    pub database_url: Option<String>,

    /// optional - A yaml config file with engine defaults.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// optional - Use the SQLite database at this path instead of PostgreSQL.
    #[clap(long, global = true)]
    pub sqlite: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// The target table, optionally schema qualified.
    #[clap(long, short)]
    pub table: String,

    /// CSV file whose header row names the source columns.
    #[clap(long, short)]
    pub file: PathBuf,

    /// optional - Route a source column into a destination column, `source=destination`.
    #[clap(long = "map", value_parser = parse_mapping)]
    pub mappings: Vec<ColumnMapping>,

    /// optional - Write the identity values from the file instead of generating them.
    #[clap(long)]
    pub keep_identity: bool,

    /// optional - Rows per load round trip.
    #[clap(long)]
    pub batch_size: Option<usize>,

    /// optional - Seconds the load and reconcile steps may take each.
    #[clap(long)]
    pub timeout_secs: Option<u64>,

    /// optional - Planner hints, rendered as a leading comment on PostgreSQL.
    #[clap(long)]
    pub hints: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconcileArgs {
    #[clap(flatten)]
    pub load: LoadArgs,

    /// optional - Columns matching file rows to table rows, primary key by default.
    #[clap(long = "qualifier")]
    pub qualifiers: Vec<String>,

    /// optional - Stage into a regular table instead of a temporary one.
    #[clap(long)]
    pub physical_staging: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Appends the rows of a csv file to a table.
    ///
    /// Example:
    /// `bulksync insert --table people --file people.csv`
    #[clap(name = "insert")]
    Insert(LoadArgs),

    /// Updates the table rows matching the csv rows on the qualifier columns.
    ///
    /// Example:
    /// `bulksync update --table people --file people.csv --qualifier email`
    #[clap(name = "update")]
    Update(ReconcileArgs),

    /// Updates matching table rows and inserts the rest.
    ///
    /// Example:
    /// `bulksync merge --table people --file people.csv --qualifier email`
    #[clap(name = "merge")]
    Merge(ReconcileArgs),

    /// Removes every row of a table.
    ///
    /// Example:
    /// `bulksync truncate --table people`
    #[clap(name = "truncate")]
    Truncate {
        /// The table to empty.
        #[clap(long, short)]
        table: String,
    },
}

fn parse_mapping(value: &str) -> Result<ColumnMapping, String> {
    value.parse().map_err(|e: bulksync::bulk::options::ParseColumnMappingError| e.to_string())
}
