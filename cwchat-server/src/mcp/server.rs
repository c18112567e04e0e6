//! Tool worker server
//!
//! Serves JSON-RPC requests from the bridge: reads requests from one stream
//! and writes responses to another, one request at a time.

use std::sync::Arc;

use cwchat_protocol::{
    methods, Framing, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ToolsListResult, WorkerCodec, JSONRPC_VERSION,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use super::error::ToolCallError;
use super::handlers::ToolHandlers;
use super::source::MetricsSource;
use super::tools::get_tool_definitions;

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// JSON-RPC server exposing the tool catalog
pub struct ToolServer {
    handlers: ToolHandlers,
    initialized: bool,
}

impl ToolServer {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            handlers: ToolHandlers::new(source),
            initialized: false,
        }
    }

    /// Serve until `reader` reaches EOF
    pub async fn serve<R, W>(
        &mut self,
        reader: R,
        writer: W,
        framing: Framing,
    ) -> Result<(), ToolCallError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut requests = FramedRead::new(reader, WorkerCodec::new(framing));
        let mut responses = FramedWrite::new(writer, WorkerCodec::new(framing));

        info!(source = self.handlers.source_name(), ?framing, "AWS CloudWatch MCP Server running on stdio");

        while let Some(frame) = requests.next().await {
            let request = frame?;
            if let Some(response) = self.handle_request(request) {
                responses.send(response).await?;
            }
        }

        info!("Input closed, tool worker exiting");
        Ok(())
    }

    /// Handle one request; notifications produce no response
    pub fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, jsonrpc_id = %request.id, "Incoming JSON-RPC request");

        if request.jsonrpc != JSONRPC_VERSION {
            error!(got_version = %request.jsonrpc, "Invalid JSON-RPC version");
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::with_data(
                    JsonRpcError::INVALID_REQUEST,
                    "Invalid JSON-RPC version",
                    serde_json::json!({"expected": JSONRPC_VERSION, "got": request.jsonrpc}),
                ),
            ));
        }

        let notification = request.is_notification();
        let result = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(),
            methods::INITIALIZED => {
                debug!("Client confirmed initialization");
                Ok(serde_json::json!({}))
            }
            methods::PING => Ok(serde_json::json!({})),
            methods::TOOLS_LIST => self.handle_tools_list(),
            methods::TOOLS_CALL => self.handle_tools_call(request.params),
            other => Err(ToolCallError::MethodNotFound(other.to_string())),
        };

        if notification {
            if let Err(e) = result {
                warn!(method = %request.method, error = %e, "Notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                warn!(method = %request.method, error = %e, "Request failed");
                JsonRpcResponse::error(request.id, e.into())
            }
        })
    }

    fn handle_initialize(&mut self) -> Result<Value, ToolCallError> {
        self.initialized = true;
        serde_json::to_value(InitializeResult::default())
            .map_err(|e| ToolCallError::Internal(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, ToolCallError> {
        let result = ToolsListResult {
            tools: get_tool_definitions(),
        };
        serde_json::to_value(result).map_err(|e| ToolCallError::Internal(e.to_string()))
    }

    fn handle_tools_call(&self, params: Value) -> Result<Value, ToolCallError> {
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| ToolCallError::InvalidParams(format!("invalid tools/call params: {}", e)))?;

        info!(tool = %params.name, "Tool call");
        let result = self.handlers.call(&params.name, params.arguments)?;
        serde_json::to_value(result).map_err(|e| ToolCallError::Internal(e.to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
