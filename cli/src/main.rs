#[cfg(feature = "jemalloc")]
use jemallocator::Jemalloc;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bulksync::{parse_log_level, setup_logger, LevelFilter};
use clap::Parser;

use crate::{
    cli_interface::{Commands, CLI},
    commands::{
        load::{handle_insert_command, handle_load_command, LoadKind},
        truncate::handle_truncate_command,
    },
    console::print_warn_message,
};

mod cli_interface;
mod commands;
mod console;

#[tokio::main]
async fn main() {
    let cli = CLI::parse();

    let log_level = parse_log_level(&cli.log_level).unwrap_or_else(|| {
        print_warn_message(&format!("Unknown log level '{}', using info", cli.log_level));
        LevelFilter::INFO
    });
    setup_logger(log_level);

    let result = match cli.command {
        Commands::Insert(args) => handle_insert_command(args, &cli.connection).await,
        Commands::Update(args) => handle_load_command(LoadKind::Update, args, &cli.connection).await,
        Commands::Merge(args) => handle_load_command(LoadKind::Merge, args, &cli.connection).await,
        Commands::Truncate { table } => handle_truncate_command(&table, &cli.connection).await,
    };

    // errors were already printed by the command
    if result.is_err() {
        std::process::exit(1);
    }
}
