//! CLI argument parsing

use clap::{Parser, Subcommand};

/// Chat with a cwchat server
#[derive(Parser, Debug)]
#[command(name = "cwchat")]
#[command(about = "Ask a cwchat server about CloudWatch metrics")]
#[command(version)]
pub struct Cli {
    /// Server address (host:port)
    #[arg(long, env = "CWCHAT_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: String,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// With no command, read chat lines from stdin
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Send one chat message
    Say {
        /// Message text; words are joined with spaces
        #[arg(required = true, trailing_var_arg = true)]
        words: Vec<String>,
    },

    /// Forward a raw JSON-RPC request to the tool worker
    Raw {
        /// Request document, or `-` to read it from stdin
        request: String,
    },

    /// List the worker's tools
    Tools,
}
