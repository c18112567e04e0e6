//! Tool definitions advertised by the worker

use cwchat_protocol::{Tool, ToolName};

/// Description shown for a tool in listings
pub fn description(name: ToolName) -> &'static str {
    match name {
        ToolName::MetricQuery => "CloudWatchからメトリクスを取得します",
        ToolName::MetricList => "利用可能なCloudWatchメトリクスを一覧表示します",
        ToolName::Ec2CpuReport => "EC2インスタンスのCPU使用率を取得します",
    }
}

/// Get all tool definitions for the worker
pub fn get_tool_definitions() -> Vec<Tool> {
    ToolName::ALL.iter().map(|name| definition(*name)).collect()
}

fn definition(name: ToolName) -> Tool {
    let input_schema = match name {
        ToolName::MetricQuery => serde_json::json!({
            "type": "object",
            "properties": {
                "namespace": {
                    "type": "string",
                    "description": "CloudWatchネームスペース (例: AWS/EC2, AWS/RDS)"
                },
                "metricName": {
                    "type": "string",
                    "description": "メトリクス名 (例: CPUUtilization, NetworkIn)"
                },
                "dimensions": {
                    "type": "array",
                    "description": "ディメンション",
                    "items": {
                        "type": "object",
                        "properties": {
                            "Name": { "type": "string" },
                            "Value": { "type": "string" }
                        }
                    }
                },
                "startTime": {
                    "type": "string",
                    "description": "開始時刻 (ISO 8601形式)"
                },
                "endTime": {
                    "type": "string",
                    "description": "終了時刻 (ISO 8601形式)"
                },
                "period": {
                    "type": "number",
                    "description": "期間（秒）",
                    "default": 300
                },
                "statistic": {
                    "type": "string",
                    "description": "統計値 (Average, Sum, Maximum, Minimum, SampleCount)",
                    "default": "Average"
                }
            },
            "required": ["namespace", "metricName"]
        }),
        ToolName::MetricList => serde_json::json!({
            "type": "object",
            "properties": {
                "namespace": {
                    "type": "string",
                    "description": "CloudWatchネームスペース (例: AWS/EC2, AWS/RDS)"
                },
                "metricName": {
                    "type": "string",
                    "description": "メトリクス名でフィルタリング"
                }
            }
        }),
        ToolName::Ec2CpuReport => serde_json::json!({
            "type": "object",
            "properties": {
                "instanceId": {
                    "type": "string",
                    "description": "EC2インスタンスID"
                },
                "hours": {
                    "type": "number",
                    "description": "過去何時間のデータを取得するか",
                    "default": 1
                }
            },
            "required": ["instanceId"]
        }),
    };

    Tool {
        name: name.as_str().into(),
        description: description(name).into(),
        input_schema,
    }
}
