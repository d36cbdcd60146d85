pub mod load;
pub mod truncate;

use bulksync::{
    read_config, BulkSyncConfig, CancellationToken, PostgresClient, SqliteConnection,
};
use tracing::info;

use crate::{cli_interface::ConnectionArgs, console::print_error_message};

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub enum Database {
    Postgres(PostgresClient),
    Sqlite(SqliteConnection),
}

/// Engine defaults from `--config`, else the built in ones.
pub fn load_config(args: &ConnectionArgs) -> Result<BulkSyncConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => read_config(path).map_err(|e| {
            print_error_message(&format!("Could not read config {}: {}", path.display(), e));
            e
        })?,
        None => BulkSyncConfig::default(),
    };

    if let Some(database_url) = &args.database_url {
        config.database_url = Some(database_url.clone());
    }

    Ok(config)
}

pub async fn open_database(
    args: &ConnectionArgs,
    config: &BulkSyncConfig,
) -> Result<Database, Box<dyn std::error::Error>> {
    if let Some(path) = &args.sqlite {
        let conn = SqliteConnection::open(path).await.map_err(|e| {
            print_error_message(&format!("Could not open SQLite database {}: {}", path, e));
            e
        })?;
        return Ok(Database::Sqlite(conn));
    }

    let database_url = config.resolve_database_url().map_err(|e| {
        print_error_message(&format!(
            "No database configured, pass --database-url, --sqlite or set DATABASE_URL: {}",
            e
        ));
        e
    })?;
    let client = PostgresClient::connect(&database_url, config.pool_max_size).await.map_err(|e| {
        print_error_message(&format!("Could not connect to Postgres: {}", e));
        e
    })?;
    Ok(Database::Postgres(client))
}

/// A token cancelled by the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, cancelling the running operation");
            trigger.cancel();
        }
    });
    cancel
}
