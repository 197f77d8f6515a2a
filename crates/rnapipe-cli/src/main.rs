mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use clap::Parser;
use rnapipe::workflows::layout::LOGS_DIR;
use std::path::PathBuf;
use tracing::{debug, error, info};

const LOG_FILE_NAME: &str = "rnapipe.log";

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// The explicit `--log-file`, or `<output>/logs/rnapipe.log` for `run`.
fn log_file_for(cli: &Cli) -> Option<PathBuf> {
    cli.log_file.clone().or_else(|| match &cli.command {
        Commands::Run(args) => Some(args.output.join(LOGS_DIR).join(LOG_FILE_NAME)),
        _ => None,
    })
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, log_file_for(&cli).as_deref())?;

    info!("🚀 rnapipe CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let command_result = match cli.command {
        Commands::Run(args) => {
            info!("Dispatching to 'run' command.");
            commands::run::run(args)
        }
        Commands::Check(args) => {
            info!("Dispatching to 'check' command.");
            commands::check::run(args)
        }
        Commands::Report(args) => {
            info!("Dispatching to 'report' command.");
            commands::report::run(args)
        }
    };

    match &command_result {
        Ok(_) => {
            info!("✅ Command completed successfully.");
            println!("✅ Command completed successfully.");
        }
        Err(e) => {
            error!("❌ Command failed: {}", e);
        }
    }

    command_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_logs_into_the_output_directory_by_default() {
        let cli = Cli::parse_from(["rnapipe", "run", "query.fa", "-o", "results"]);
        assert_eq!(
            log_file_for(&cli),
            Some(PathBuf::from("results").join("logs").join("rnapipe.log"))
        );
    }

    #[test]
    fn explicit_log_file_wins_and_other_commands_have_none() {
        let cli = Cli::parse_from(["rnapipe", "--log-file", "x.log", "run", "q.fa"]);
        assert_eq!(log_file_for(&cli), Some(PathBuf::from("x.log")));

        let cli = Cli::parse_from(["rnapipe", "report", "results"]);
        assert_eq!(log_file_for(&cli), None);
    }
}
