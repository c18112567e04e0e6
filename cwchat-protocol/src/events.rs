//! Front-door events
//!
//! Chat clients talk to the server with one JSON object per line. Each
//! inbound event produces exactly one outbound event.

use serde::{Deserialize, Serialize};

/// Events sent by a chat client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Free text to be routed onto a tool call
    ChatMessage { message: String },
    /// A raw JSON-RPC request forwarded to the worker as-is
    McpRequest { request: serde_json::Value },
}

/// Outcome of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Success,
    Error,
}

/// Events sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Reply to a [`ClientEvent::ChatMessage`]
    ChatResponse { status: ChatStatus, message: String },
    /// Reply to a [`ClientEvent::McpRequest`]
    McpResponse { response: serde_json::Value },
}

impl ServerEvent {
    pub fn chat_success(message: impl Into<String>) -> Self {
        Self::ChatResponse {
            status: ChatStatus::Success,
            message: message.into(),
        }
    }

    pub fn chat_error(message: impl Into<String>) -> Self {
        Self::ChatResponse {
            status: ChatStatus::Error,
            message: message.into(),
        }
    }

    /// Pass-through failure, shaped as `{"error": "..."}`
    pub fn mcp_error(message: impl Into<String>) -> Self {
        Self::McpResponse {
            response: serde_json::json!({ "error": message.into() }),
        }
    }
}
