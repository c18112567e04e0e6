//! Worker-side error types

use std::io;

use cwchat_protocol::{CodecError, JsonRpcError};

use super::source::SourceError;

/// Errors raised while serving tool calls
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    /// IO error (stdin/stdout)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing error on stdin/stdout
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Unknown tool
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran but its metrics source failed
    #[error("Error executing tool {tool}: {message}")]
    Execution { tool: String, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolCallError {
    /// Wrap a metrics source failure with the tool-specific prefix
    pub fn execution(tool: &str, prefix: &str, source: SourceError) -> Self {
        Self::Execution {
            tool: tool.to_string(),
            message: format!("{}: {}", prefix, source),
        }
    }
}

impl From<ToolCallError> for JsonRpcError {
    fn from(err: ToolCallError) -> Self {
        match err {
            ToolCallError::MethodNotFound(method) => JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
            ToolCallError::InvalidParams(msg) => JsonRpcError::new(JsonRpcError::INVALID_PARAMS, msg),
            ToolCallError::UnknownTool(name) => JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Unknown tool: {}", name),
            ),
            err @ ToolCallError::Execution { .. } => {
                JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, err.to_string())
            }
            ToolCallError::Io(err) => {
                JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, format!("IO error: {}", err))
            }
            ToolCallError::Codec(err) => {
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Codec error: {}", err))
            }
            ToolCallError::Internal(msg) => JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, msg),
        }
    }
}
