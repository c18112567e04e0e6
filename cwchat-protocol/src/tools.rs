//! Tool catalog and tool invocation types
//!
//! The worker advertises its tools through `tools/list` and executes them
//! through `tools/call`. The command router produces [`ToolInvocation`]s,
//! which serialize directly into `tools/call` params.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MCP_PROTOCOL_VERSION;

/// The operations the worker can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolName {
    /// Fetch statistics for one metric
    #[serde(rename = "get_cloudwatch_metrics")]
    MetricQuery,
    /// List available metrics, optionally filtered
    #[serde(rename = "list_cloudwatch_metrics")]
    MetricList,
    /// Canned CPU utilization report for one EC2 instance
    #[serde(rename = "get_ec2_cpu_metrics")]
    Ec2CpuReport,
}

impl ToolName {
    /// All tools, in catalog order
    pub const ALL: [ToolName; 3] = [Self::MetricQuery, Self::MetricList, Self::Ec2CpuReport];

    /// Wire name used in `tools/call`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetricQuery => "get_cloudwatch_metrics",
            Self::MetricList => "list_cloudwatch_metrics",
            Self::Ec2CpuReport => "get_ec2_cpu_metrics",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| format!("Unknown tool: {}", s))
    }
}

/// A structured request for one tool execution
///
/// Serializes as the `params` object of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: ToolName,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolInvocation {
    pub fn new(name: ToolName) -> Self {
        Self {
            name,
            arguments: serde_json::Map::new(),
        }
    }

    /// Builder-style argument insertion
    pub fn arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Look up an argument by name
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.arguments.get(key)
    }

    /// Render as `tools/call` params
    pub fn to_params(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name.as_str(),
            "arguments": serde_json::Value::Object(self.arguments.clone()),
        })
    }
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (e.g., "get_ec2_cpu_metrics")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Tools list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// Available tools
    pub tools: Vec<Tool>,
}

/// MCP Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content blocks returned by the tool
    pub content: Vec<ToolContent>,
    /// Whether this result represents an error
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// First text block, if any
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ToolContent::Text { text } => Some(text.as_str()),
        })
    }
}

/// MCP Tool content types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },
}

/// MCP Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "aws-cloudwatch-mcp".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: serde_json::Value,
    /// Server info
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({ "tools": {} }),
            server_info: ServerInfo::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name_wire_names() {
        assert_eq!(
            serde_json::to_value(ToolName::Ec2CpuReport).unwrap(),
            serde_json::json!("get_ec2_cpu_metrics")
        );
        assert_eq!(
            "list_cloudwatch_metrics".parse::<ToolName>().unwrap(),
            ToolName::MetricList
        );
        assert!("describe_instances".parse::<ToolName>().is_err());
    }

    #[test]
    fn test_invocation_params_shape() {
        let invocation = ToolInvocation::new(ToolName::Ec2CpuReport)
            .arg("instanceId", "i-0abc123")
            .arg("hours", 2);

        assert_eq!(
            invocation.to_params(),
            serde_json::json!({
                "name": "get_ec2_cpu_metrics",
                "arguments": {"instanceId": "i-0abc123", "hours": 2}
            })
        );
    }

    #[test]
    fn test_invocation_without_arguments_has_empty_object() {
        let invocation = ToolInvocation::new(ToolName::MetricList);
        assert_eq!(invocation.to_params()["arguments"], serde_json::json!({}));
    }

    #[test]
    fn test_tool_result_text() {
        let result = ToolResult::text("CPU 12.5%");
        assert!(result.is_error.is_none());
        assert_eq!(result.first_text(), Some("CPU 12.5%"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[test]
    fn test_initialize_result_serialization() {
        let json = serde_json::to_string(&InitializeResult::default()).unwrap();
        assert!(json.contains("protocolVersion"));
        assert!(json.contains("2024-11-05"));
        assert!(json.contains("serverInfo"));
    }
}
