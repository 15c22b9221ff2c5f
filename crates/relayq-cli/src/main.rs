//! relayq CLI: run a queue manager node, or exercise one.
//!
//! `relayq start` boots a node and its listener in the foreground.
//! `relayq send` and `relayq ping` are small clients for testing a node.

mod cli;
mod cmd;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    match cli.command {
        Commands::Start(args) => cmd::start::cmd_start(cli.config, args),
        Commands::Send(args) => cmd::send::cmd_send(args),
        Commands::Ping(args) => cmd::send::cmd_ping(args),
    }
}
