use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser, Debug)]
#[command(name = "taxlot", version, about = "UK Capital Gains Tax lot accounting")]
struct Cli {
    /// Engine config (JSON): exempt amounts, tax year start, matching window
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show Section 104 pool balances or their history
    Pools(cmd::pools::PoolsCommand),
    /// List disposals with their same-day, 30-day and pool matches
    Disposals(cmd::disposals::DisposalsCommand),
    /// Generate the CGT report for a tax year
    Report(cmd::report::ReportCommand),
    /// Rank positions for tax-loss harvesting
    Harvest(cmd::harvest::HarvestCommand),
    /// Check a ledger for problems (exits with 1 when any are found)
    Validate(cmd::validate::ValidateCommand),
    /// Print the expected ledger input formats
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    let config = cmd::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Pools(pools) => pools.exec(&config),
        Command::Disposals(disposals) => disposals.exec(&config),
        Command::Report(report) => report.exec(&config),
        Command::Harvest(harvest) => harvest.exec(&config),
        Command::Validate(validate) => validate.exec(&config),
        Command::Schema(schema) => schema.exec(),
    }
}
