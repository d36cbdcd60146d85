use bulksync::{BulkSync, InsertLoader, PostgresCopyLoader, TableName};

use crate::{
    cli_interface::ConnectionArgs,
    commands::{cancel_on_ctrl_c, load_config, open_database, CommandResult, Database},
    console::{print_error_message, print_success_message, print_warn_message},
};

pub async fn handle_truncate_command(table: &str, connection: &ConnectionArgs) -> CommandResult {
    let config = load_config(connection)?;
    let table = TableName::parse(table);
    print_warn_message(&format!("This removes every row of {} and can not be reverted.", table));

    let database = open_database(connection, &config).await?;
    let cancel = cancel_on_ctrl_c();

    let result = match database {
        Database::Postgres(client) => {
            let conn = client.connection().await?;
            BulkSync::new(PostgresCopyLoader, config).truncate(&conn, &table, None, &cancel).await
        }
        Database::Sqlite(conn) => {
            BulkSync::new(InsertLoader, config).truncate(&conn, &table, None, &cancel).await
        }
    };

    match result {
        Ok(()) => {
            print_success_message(&format!("Truncated {}", table));
            Ok(())
        }
        Err(e) => {
            print_error_message(&format!("Could not truncate {}: {}", table, e));
            Err(e.into())
        }
    }
}
