//! cwchat: command-line chat client for the cwchat server

mod cli;
mod client;
mod commands;

use std::time::Duration;

use clap::Parser;
use cli::Cli;
use cwchat_utils::{init_logging_with_config, LogConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging_with_config(LogConfig::client()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    let exit_code = match commands::execute(cli.command, &cli.addr, timeout).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}
