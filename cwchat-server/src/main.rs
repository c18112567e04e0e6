//! cwchat server - chat front door, or the tool worker with `worker`

use tracing::{info, warn};

use cwchat_server::config::{AppConfig, ConfigLoader};
use cwchat_server::{mcp, Server, WORKER_ARG};
use cwchat_utils::{init_logging_with_config, CwchatError, LogConfig, Result};

/// Run the tool worker on stdin/stdout
async fn run_worker() -> Result<()> {
    init_logging_with_config(LogConfig::worker())?;

    let config = match ConfigLoader::load_and_validate() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            AppConfig::default()
        }
    };

    mcp::run_stdio(&config)
        .await
        .map_err(|e| CwchatError::worker(e.to_string()))
}

/// Run the front door until Ctrl-C
async fn run_server() -> Result<()> {
    init_logging_with_config(LogConfig::server())?;

    let config = ConfigLoader::load_and_validate()?;
    let server = Server::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server.shutdown().await?;
    info!("cwchat server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == WORKER_ARG {
        return run_worker().await;
    }

    run_server().await
}
