mod cmd;
mod core;

use clap::{Parser, Subcommand};

use crate::cmd::compute::ComputeCommand;
use crate::cmd::schema::SchemaCommand;
use crate::cmd::validate::ValidateCommand;

#[derive(Parser, Debug)]
#[command(
    name = "taxrec",
    about = "Reconcile invoice tax items against a tax-code catalog",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the new tax and adjustment items for a snapshot
    Compute(ComputeCommand),
    /// Surface data quality issues in a snapshot
    Validate(ValidateCommand),
    /// Print the JSON Schema of the snapshot format
    Schema(SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Compute(cmd) => cmd.exec(),
        Command::Validate(cmd) => cmd.exec(),
        Command::Schema(cmd) => cmd.exec(),
    }
}
