//! cwchat-protocol: Shared wire definitions for cwchat
//!
//! This crate defines the JSON-RPC messages exchanged between the process
//! bridge and the tool worker over stdio, the tool invocation types produced
//! by the command router, the events spoken by the chat front door, and the
//! codec that frames all of them on a byte stream.

pub mod codec;
pub mod events;
pub mod jsonrpc;
pub mod tools;

// Re-export main types at crate root
pub use codec::{
    BridgeCodec, ClientEventCodec, CodecError, Framing, ServerEventCodec, WireCodec, WorkerCodec,
    MAX_MESSAGE_SIZE,
};
pub use events::{ChatStatus, ClientEvent, ServerEvent};
pub use jsonrpc::{methods, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use tools::{
    InitializeResult, ServerInfo, Tool, ToolContent, ToolInvocation, ToolName, ToolResult,
    ToolsListResult,
};

/// JSON-RPC version carried in every message
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced by the worker on `initialize`
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
