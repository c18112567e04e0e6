//! Tool worker mode
//!
//! `cwchat-server worker` runs this side of the bridge: a JSON-RPC server on
//! stdin/stdout that executes the CloudWatch tools against a metrics source.

pub mod error;
pub mod handlers;
pub mod server;
pub mod source;
pub mod tools;

pub use error::ToolCallError;
pub use handlers::ToolHandlers;
pub use server::ToolServer;
pub use source::{FixtureSource, MetricsSource, SourceError, SyntheticSource};
pub use tools::get_tool_definitions;

use crate::config::AppConfig;

/// Serve tool calls on this process's stdin/stdout
pub async fn run_stdio(config: &AppConfig) -> Result<(), ToolCallError> {
    let source = source::from_config(&config.metrics)
        .map_err(|e| ToolCallError::Internal(format!("metrics source unavailable: {}", e)))?;

    ToolServer::new(source)
        .serve(tokio::io::stdin(), tokio::io::stdout(), config.worker.framing)
        .await
}
