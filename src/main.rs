//! sigmerge CLI

mod cli;

use anstream::eprintln;
use clap::{Parser, Subcommand};
use cli::style::Stylize;
use cli::{GateArgs, SignersArgs};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Commit signature gate with fast-forward merge
#[derive(Parser)]
#[command(name = "sigmerge", version, long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate the range, then fast-forward base to head
    Run(GateArgs),
    /// Authenticate the range only
    Check(GateArgs),
    /// Validate an allowed-signers file and list its entries
    Signers(SignersArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sigmerge=debug" } else { "sigmerge=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => cli::run::run_gate(args, false).await,
        Commands::Check(args) => cli::run::run_gate(args, true).await,
        Commands::Signers(args) => cli::signers::run_signers(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".error());
            ExitCode::from(cli::run::EXIT_FATAL)
        }
    }
}
