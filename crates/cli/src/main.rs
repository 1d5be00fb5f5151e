//! Command-line driver for the outdial control plane
//!
//! - `simulate` replays a lead list against virtual time and prints the
//!   resulting queue, usage and daily summaries
//! - `run` hosts the engine in real time and streams its notices
//! - `check-config` validates a settings file

mod commands;
mod leads;
mod report;

use clap::{Parser, Subcommand};
use outdial_infra_common::logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Outbound dialer control plane", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "OUTDIAL_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dial a lead list on simulated time
    Simulate(commands::simulate::SimulateArgs),
    /// Run the engine in real time until interrupted
    Run(commands::run::RunArgs),
    /// Validate a settings file and print the effective configuration
    CheckConfig(commands::check_config::CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::new(parse_log_level(&cli.log_level)?, "outdial");
    if cli.json_logs {
        logging = logging.with_json();
    }
    setup_logging(&logging)?;
    log_welcome(&logging, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Simulate(args) => commands::simulate::execute(args),
        Command::Run(args) => commands::run::execute(args).await,
        Command::CheckConfig(args) => commands::check_config::execute(args),
    }
}
