use std::time::Duration;

use bulksync::{
    read_csv_rows, BulkSync, BulkSyncError, BulkUpdateOptions, CancellationToken, Connection,
    InsertLoader, PostgresCopyLoader, RowLoader, RowReader, TableName,
};

use crate::{
    cli_interface::{ConnectionArgs, LoadArgs, ReconcileArgs},
    commands::{cancel_on_ctrl_c, load_config, open_database, CommandResult, Database},
    console::{print_error_message, print_success_message},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Insert,
    Update,
    Merge,
}

impl LoadKind {
    fn past_tense(&self) -> &'static str {
        match self {
            LoadKind::Insert => "Inserted",
            LoadKind::Update => "Updated",
            LoadKind::Merge => "Merged",
        }
    }
}

fn update_options(args: &ReconcileArgs) -> BulkUpdateOptions {
    let load = &args.load;
    let mut options = BulkUpdateOptions::default()
        .with_mappings(load.mappings.clone())
        .with_qualifiers(args.qualifiers.clone());

    if load.keep_identity {
        options = options.with_keep_identity(true);
    }
    if args.physical_staging {
        options = options.with_physical_staging(true);
    }
    if let Some(batch_size) = load.batch_size {
        options = options.with_batch_size(batch_size);
    }
    if let Some(timeout_secs) = load.timeout_secs {
        options = options.with_timeout(Duration::from_secs(timeout_secs));
    }
    if let Some(hints) = &load.hints {
        options = options.with_hints(hints.clone());
    }
    options
}

async fn run<C, L>(
    bulk: &BulkSync<L>,
    connection: &C,
    kind: LoadKind,
    table: &TableName,
    rows: RowReader<'static>,
    options: &BulkUpdateOptions,
    cancel: &CancellationToken,
) -> Result<u64, BulkSyncError>
where
    C: Connection,
    L: RowLoader<C>,
{
    match kind {
        LoadKind::Insert => {
            bulk.bulk_insert(connection, table, rows, &options.insert, None, cancel).await
        }
        LoadKind::Update => bulk.bulk_update(connection, table, rows, options, None, cancel).await,
        LoadKind::Merge => bulk.bulk_merge(connection, table, rows, options, None, cancel).await,
    }
}

pub async fn handle_insert_command(args: LoadArgs, connection: &ConnectionArgs) -> CommandResult {
    let args = ReconcileArgs { load: args, qualifiers: Vec::new(), physical_staging: false };
    handle_load_command(LoadKind::Insert, args, connection).await
}

pub async fn handle_load_command(
    kind: LoadKind,
    args: ReconcileArgs,
    connection: &ConnectionArgs,
) -> CommandResult {
    let config = load_config(connection)?;
    let table = TableName::parse(&args.load.table);
    let options = update_options(&args);

    let rows = read_csv_rows(&args.load.file).await.map_err(|e| {
        print_error_message(&format!("Could not read {}: {}", args.load.file.display(), e));
        e
    })?;

    let database = open_database(connection, &config).await?;
    let cancel = cancel_on_ctrl_c();

    let result = match database {
        Database::Postgres(client) => {
            let conn = client.connection().await?;
            let bulk = BulkSync::new(PostgresCopyLoader, config);
            run(&bulk, &conn, kind, &table, rows, &options, &cancel).await
        }
        Database::Sqlite(conn) => {
            let bulk = BulkSync::new(InsertLoader, config);
            run(&bulk, &conn, kind, &table, rows, &options, &cancel).await
        }
    };

    match result {
        Ok(count) => {
            print_success_message(&format!("{} {} rows in {}", kind.past_tense(), count, table));
            Ok(())
        }
        Err(e) => {
            print_error_message(&format!("Could not {} {}: {}", kind_verb(kind), table, e));
            Err(e.into())
        }
    }
}

fn kind_verb(kind: LoadKind) -> &'static str {
    match kind {
        LoadKind::Insert => "insert into",
        LoadKind::Update => "update",
        LoadKind::Merge => "merge into",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use bulksync::ColumnMapping;

    use super::*;

    #[test]
    fn test_update_options_from_args() {
        let args = ReconcileArgs {
            load: LoadArgs {
                table: "people".to_string(),
                file: PathBuf::from("people.csv"),
                mappings: vec![ColumnMapping::new("email", "email")],
                keep_identity: true,
                batch_size: Some(500),
                timeout_secs: Some(9),
                hints: None,
            },
            qualifiers: vec!["email".to_string()],
            physical_staging: true,
        };

        let options = update_options(&args);
        assert_eq!(options.qualifiers, vec!["email".to_string()]);
        assert_eq!(options.use_physical_staging, Some(true));
        assert_eq!(options.insert.keep_identity, Some(true));
        assert_eq!(options.insert.batch_size, Some(500));
        assert_eq!(options.insert.timeout, Some(Duration::from_secs(9)));
        assert_eq!(options.insert.mappings.len(), 1);
        assert_eq!(options.insert.hints, None);
    }

    #[test]
    fn test_unset_flags_leave_engine_defaults() {
        let args = ReconcileArgs {
            load: LoadArgs {
                table: "people".to_string(),
                file: PathBuf::from("people.csv"),
                mappings: Vec::new(),
                keep_identity: false,
                batch_size: None,
                timeout_secs: None,
                hints: None,
            },
            qualifiers: Vec::new(),
            physical_staging: false,
        };

        let options = update_options(&args);
        assert_eq!(options.insert.keep_identity, None);
        assert_eq!(options.use_physical_staging, None);
    }
}
