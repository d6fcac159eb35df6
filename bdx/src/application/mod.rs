pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use bdx_core::error::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Export {
            login,
            archives,
            out,
            error_log,
            threads,
            poll_ms,
            keep_channel,
        } => handlers::handle_export(
            login,
            archives,
            out,
            error_log,
            threads,
            poll_ms,
            keep_channel,
        ),
        Commands::Scan { archive } => handlers::handle_scan(archive),
        Commands::Cleanup { login } => handlers::handle_cleanup(login),
    }
}
