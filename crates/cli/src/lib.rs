pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ordersync",
    about = "Ordersync operator CLI",
    long_about = "Apply migrations, inspect configuration, and run one-off order pushes or chat relay ticks.",
    after_help = "Examples:\n  ordersync migrate\n  ordersync push-order 1042\n  ordersync relay-once"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Push one stored order to the CRM regardless of discovery")]
    PushOrder {
        #[arg(help = "Local order id")]
        order_id: i64,
    },
    #[command(about = "Run one order discovery and push cycle")]
    PushPending,
    #[command(about = "Run a single chat relay tick")]
    RelayOnce,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::PushOrder { order_id } => commands::push::run_order(order_id),
        Command::PushPending => commands::push::run_pending(),
        Command::RelayOnce => commands::relay::run_once(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
