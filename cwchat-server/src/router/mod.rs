//! Command router
//!
//! Turns one chat message into at most one tool call and renders the result
//! as text for the chat front door.

mod rules;

pub use rules::{classify, Route, RouterPolicy};

use std::future::Future;
use std::sync::Arc;

use cwchat_protocol::{methods, JsonRpcError, JsonRpcResponse, ToolResult, ToolsListResult};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::bridge::BridgeError;

/// Shown when a message matches no rule
pub const USAGE: &str = "理解できませんでした。以下のコマンドを試してください:\n\n\
• \"EC2のCPU使用率を取得して\" または \"EC2 i-1234567890abcdef0 のCPU 2時間\"\n\
• \"CloudWatchメトリクス一覧\" または \"AWS/EC2 メトリクス一覧\"\n\
• \"CloudWatch AWS/EC2 CPUUtilization メトリクス\"\n\
• \"利用可能なツール\" または \"help\"";

/// Something that can run JSON-RPC calls against the tool worker
pub trait ToolExecutor: Send + Sync {
    fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> impl Future<Output = Result<JsonRpcResponse, BridgeError>> + Send;

    /// Forward a caller-built request and return the raw response document
    fn execute(
        &self,
        request: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, BridgeError>> + Send;
}

/// Failure to turn a chat message into an answer
#[derive(Debug, thiserror::Error)]
pub enum CommandExecutionError {
    #[error("コマンド実行エラー: {0}")]
    Bridge(#[from] BridgeError),

    /// The worker answered with a JSON-RPC error
    #[error("コマンド実行エラー: {0}")]
    Tool(JsonRpcError),

    #[error("コマンド実行エラー: unexpected response from worker: {0}")]
    UnexpectedResponse(String),
}

/// Routes chat text through a [`ToolExecutor`]
pub struct CommandRouter<E> {
    executor: Arc<E>,
    policy: RouterPolicy,
}

impl<E: ToolExecutor> CommandRouter<E> {
    pub fn new(executor: Arc<E>, policy: RouterPolicy) -> Self {
        Self { executor, policy }
    }

    pub fn policy(&self) -> &RouterPolicy {
        &self.policy
    }

    /// Answer one chat message
    pub async fn route(&self, text: &str) -> Result<String, CommandExecutionError> {
        let route = classify(text, &self.policy);
        debug!(?route, "Classified chat message");

        match route {
            Route::Help => Ok(USAGE.to_string()),
            Route::Rejected(reason) => {
                info!(%reason, "Chat message rejected by strict parsing");
                Ok(format!("{}\n\n{}", reason, USAGE))
            }
            Route::ListTools => {
                let response = self
                    .executor
                    .call(methods::TOOLS_LIST, serde_json::json!({}))
                    .await?;
                let list: ToolsListResult = take_result(response)?;
                Ok(format_tool_list(&list))
            }
            Route::Invoke(invocation) => {
                info!(tool = %invocation.name, "Invoking tool for chat message");
                let response = self
                    .executor
                    .call(methods::TOOLS_CALL, invocation.to_params())
                    .await?;
                let result: ToolResult = take_result(response)?;
                result
                    .first_text()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        CommandExecutionError::UnexpectedResponse(
                            "tool result has no text content".into(),
                        )
                    })
            }
        }
    }
}

fn take_result<T: DeserializeOwned>(response: JsonRpcResponse) -> Result<T, CommandExecutionError> {
    if let Some(error) = response.error {
        return Err(CommandExecutionError::Tool(error));
    }
    let result = response.result.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(result).map_err(|e| CommandExecutionError::UnexpectedResponse(e.to_string()))
}

/// `利用可能なツール:` followed by one bullet per tool
pub fn format_tool_list(list: &ToolsListResult) -> String {
    let lines: Vec<String> = list
        .tools
        .iter()
        .map(|tool| format!("• {}: {}", tool.name, tool.description))
        .collect();
    format!("利用可能なツール:\n\n{}", lines.join("\n"))
}
