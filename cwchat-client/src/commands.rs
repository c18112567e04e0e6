//! Command execution
//!
//! Each command returns the process exit code: 0 when the server answered
//! successfully, 1 when it answered with an error.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use cwchat_protocol::{methods, ChatStatus, ServerEvent};
use cwchat_utils::{CwchatError, Result};

use crate::cli::Command;
use crate::client::Client;

const QUIT_WORDS: &[&str] = &["exit", "quit"];

pub async fn execute(command: Option<Command>, addr: &str, timeout: Duration) -> Result<i32> {
    let mut client = Client::connect(addr, timeout).await?;

    match command {
        Some(Command::Say { words }) => {
            let reply = client.chat(words.join(" ")).await?;
            Ok(print_event(&reply))
        }
        Some(Command::Raw { request }) => {
            let request = read_request(&request).await?;
            let reply = client.mcp(request).await?;
            Ok(print_event(&reply))
        }
        Some(Command::Tools) => {
            let request = serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": methods::TOOLS_LIST,
                "params": {}
            });
            let reply = client.mcp(request).await?;
            Ok(print_event(&reply))
        }
        None => repl(&mut client).await,
    }
}

/// Parse the request argument, reading stdin for `-`
async fn read_request(arg: &str) -> Result<serde_json::Value> {
    let text = if arg == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        arg.to_string()
    };

    serde_json::from_str(&text).map_err(|e| CwchatError::protocol(format!("invalid JSON request: {}", e)))
}

/// Chat line by line until EOF or a quit word
async fn repl(client: &mut Client) -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if QUIT_WORDS.contains(&line) {
            break;
        }

        let reply = client.chat(line).await?;
        print_event(&reply);
    }

    Ok(0)
}

/// Print a reply and return the exit code it implies
fn print_event(event: &ServerEvent) -> i32 {
    match event {
        ServerEvent::ChatResponse { status, message } => match status {
            ChatStatus::Success => {
                println!("{}", message);
                0
            }
            ChatStatus::Error => {
                eprintln!("{}", message);
                1
            }
        },
        ServerEvent::McpResponse { response } => {
            let text = serde_json::to_string_pretty(response).unwrap_or_else(|_| response.to_string());
            println!("{}", text);
            if response.get("error").is_some() {
                1
            } else {
                0
            }
        }
    }
}
