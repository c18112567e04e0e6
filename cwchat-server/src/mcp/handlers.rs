//! Tool handlers
//!
//! Each handler parses its arguments, queries the metrics source and renders
//! the reply text: a short human-readable summary followed by the full data
//! as pretty-printed JSON.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cwchat_protocol::{ToolName, ToolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ToolCallError;
use super::source::{
    Datapoint, Dimension, MetricDescriptor, MetricFilter, MetricsSource, Statistic, StatisticsQuery,
};

/// Latest points shown before the detail block
const RECENT_POINTS: usize = 5;

/// Metrics listed by name before "… および他N個"
const LISTED_METRICS: usize = 10;

/// Longest lookback accepted by the EC2 report (CloudWatch keeps 15 months)
const MAX_REPORT_HOURS: f64 = 455.0 * 24.0;

fn default_period() -> u32 {
    300
}

fn default_hours() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricQueryArgs {
    namespace: String,
    metric_name: String,
    #[serde(default)]
    dimensions: Vec<Dimension>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_period")]
    period: u32,
    #[serde(default)]
    statistic: Statistic,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricListArgs {
    namespace: Option<String>,
    metric_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ec2CpuArgs {
    instance_id: String,
    #[serde(default = "default_hours")]
    hours: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricQueryDetail<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    statistic: Statistic,
    datapoints: Vec<PointDetail<'a>>,
}

#[derive(Serialize)]
struct PointDetail<'a> {
    timestamp: String,
    value: Option<f64>,
    unit: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricDetail<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: &'a [Dimension],
}

#[derive(Serialize)]
struct CpuPointDetail<'a> {
    timestamp: String,
    average: f64,
    maximum: f64,
    unit: &'a str,
}

/// Executes tool calls against a metrics source
pub struct ToolHandlers {
    source: Arc<dyn MetricsSource>,
}

impl ToolHandlers {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Run a tool by wire name
    pub fn call(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResult, ToolCallError> {
        self.call_at(name, arguments, Utc::now())
    }

    /// Run a tool with an explicit notion of "now"
    pub fn call_at(
        &self,
        name: &str,
        arguments: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ToolResult, ToolCallError> {
        let tool: ToolName = name
            .parse()
            .map_err(|_| ToolCallError::UnknownTool(name.to_string()))?;

        debug!(tool = %tool, source = self.source.name(), "Executing tool");

        let text = match tool {
            ToolName::MetricQuery => self.metric_query(parse_args(arguments)?, now)?,
            ToolName::MetricList => self.metric_list(parse_args(arguments)?)?,
            ToolName::Ec2CpuReport => self.ec2_cpu_report(parse_args(arguments)?, now)?,
        };
        Ok(ToolResult::text(text))
    }

    fn metric_query(&self, args: MetricQueryArgs, now: DateTime<Utc>) -> Result<String, ToolCallError> {
        let tool = ToolName::MetricQuery.as_str();
        let query = StatisticsQuery {
            namespace: args.namespace,
            metric_name: args.metric_name,
            dimensions: args.dimensions,
            start: args.start_time.unwrap_or(now - Duration::hours(1)),
            end: args.end_time.unwrap_or(now),
            period_secs: args.period,
            statistics: vec![args.statistic],
        };

        let mut points = self
            .source
            .get_metric_statistics(&query)
            .map_err(|e| ToolCallError::execution(tool, "CloudWatch API エラー", e))?;
        sort_by_time(&mut points);

        let detail = MetricQueryDetail {
            namespace: &query.namespace,
            metric_name: &query.metric_name,
            statistic: args.statistic,
            datapoints: points
                .iter()
                .map(|p| PointDetail {
                    timestamp: timestamp(&p.timestamp),
                    value: p.value(args.statistic),
                    unit: &p.unit,
                })
                .collect(),
        };

        let recent: Vec<String> = recent(&detail.datapoints)
            .iter()
            .map(|p| format!("{}: {} {}", p.timestamp, number(p.value), p.unit))
            .collect();

        Ok(format!(
            "CloudWatch メトリクス: {}/{}\n\n統計値: {}\nデータポイント数: {}\n\n最新の値:\n{}\n\n詳細データ:\n{}",
            query.namespace,
            query.metric_name,
            args.statistic,
            detail.datapoints.len(),
            recent.join("\n"),
            pretty(&detail)?
        ))
    }

    fn metric_list(&self, args: MetricListArgs) -> Result<String, ToolCallError> {
        let tool = ToolName::MetricList.as_str();
        let filter = MetricFilter {
            namespace: args.namespace.filter(|s| !s.is_empty()),
            metric_name: args.metric_name.filter(|s| !s.is_empty()),
        };

        let metrics = self
            .source
            .list_metrics(&filter)
            .map_err(|e| ToolCallError::execution(tool, "CloudWatch API エラー", e))?;

        let bullets: Vec<String> = metrics
            .iter()
            .take(LISTED_METRICS)
            .map(metric_bullet)
            .collect();

        let more = if metrics.len() > LISTED_METRICS {
            format!("\n\n... および他{}個", metrics.len() - LISTED_METRICS)
        } else {
            String::new()
        };

        let detail: Vec<MetricDetail<'_>> = metrics
            .iter()
            .map(|m| MetricDetail {
                namespace: &m.namespace,
                metric_name: &m.metric_name,
                dimensions: &m.dimensions,
            })
            .collect();

        Ok(format!(
            "利用可能なCloudWatchメトリクス ({}個)\n\n{}{}\n\n詳細データ:\n{}",
            metrics.len(),
            bullets.join("\n"),
            more,
            pretty(&detail)?
        ))
    }

    fn ec2_cpu_report(&self, args: Ec2CpuArgs, now: DateTime<Utc>) -> Result<String, ToolCallError> {
        let tool = ToolName::Ec2CpuReport.as_str();
        if args.instance_id.trim().is_empty() {
            return Err(ToolCallError::InvalidParams("instanceId must not be empty".into()));
        }
        if !args.hours.is_finite() || args.hours <= 0.0 || args.hours > MAX_REPORT_HOURS {
            return Err(ToolCallError::InvalidParams(format!(
                "hours must be greater than 0 and at most {}",
                MAX_REPORT_HOURS
            )));
        }

        let lookback = Duration::milliseconds((args.hours * 3_600_000.0) as i64);
        let query = StatisticsQuery {
            namespace: "AWS/EC2".into(),
            metric_name: "CPUUtilization".into(),
            dimensions: vec![Dimension::new("InstanceId", args.instance_id.as_str())],
            start: now - lookback,
            end: now,
            period_secs: 300,
            statistics: vec![Statistic::Average, Statistic::Maximum],
        };

        let mut points = self
            .source
            .get_metric_statistics(&query)
            .map_err(|e| ToolCallError::execution(tool, "EC2 CPU メトリクス取得エラー", e))?;
        sort_by_time(&mut points);

        let detail: Vec<CpuPointDetail<'_>> = points
            .iter()
            .map(|p| CpuPointDetail {
                timestamp: timestamp(&p.timestamp),
                average: p.average.unwrap_or(0.0),
                maximum: p.maximum.unwrap_or(0.0),
                unit: &p.unit,
            })
            .collect();

        let mean = if detail.is_empty() {
            0.0
        } else {
            detail.iter().map(|p| p.average).sum::<f64>() / detail.len() as f64
        };

        let recent: Vec<String> = recent(&detail)
            .iter()
            .map(|p| format!("{}: 平均{:.2}% 最大{:.2}%", p.timestamp, p.average, p.maximum))
            .collect();

        Ok(format!(
            "EC2インスタンス {} のCPU使用率\n\n期間: 過去{}時間\n平均CPU使用率: {:.2}%\nデータポイント数: {}\n\n最新の5つのデータポイント:\n{}\n\n詳細データ:\n{}",
            args.instance_id,
            args.hours,
            mean,
            detail.len(),
            recent.join("\n"),
            pretty(&detail)?
        ))
    }
}

fn parse_args<T: DeserializeOwned>(arguments: serde_json::Value) -> Result<T, ToolCallError> {
    let arguments = if arguments.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolCallError::InvalidParams(e.to_string()))
}

fn sort_by_time(points: &mut [Datapoint]) {
    points.sort_by_key(|p| p.timestamp);
}

fn recent<T>(items: &[T]) -> &[T] {
    &items[items.len().saturating_sub(RECENT_POINTS)..]
}

fn metric_bullet(metric: &MetricDescriptor) -> String {
    let mut line = format!("• {}/{}", metric.namespace, metric.metric_name);
    if !metric.dimensions.is_empty() {
        let dims: Vec<String> = metric.dimensions.iter().map(Dimension::to_string).collect();
        line.push_str(&format!(" ({})", dims.join(", ")));
    }
    line
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn pretty<T: Serialize>(value: &T) -> Result<String, ToolCallError> {
    serde_json::to_string_pretty(value).map_err(|e| ToolCallError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::source::{FixtureSource, SyntheticSource};
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn synthetic() -> ToolHandlers {
        ToolHandlers::new(Arc::new(SyntheticSource::default()))
    }

    fn text(result: ToolResult) -> String {
        result.first_text().unwrap().to_string()
    }

    #[test]
    fn test_unknown_tool() {
        let err = synthetic().call("drop_tables", json!({})).unwrap_err();
        assert!(matches!(err, ToolCallError::UnknownTool(_)));
    }

    #[test]
    fn test_metric_query_requires_namespace_and_metric() {
        let err = synthetic()
            .call_at("get_cloudwatch_metrics", json!({"namespace": "AWS/EC2"}), now())
            .unwrap_err();
        assert!(matches!(err, ToolCallError::InvalidParams(_)));
    }

    #[test]
    fn test_metric_query_text() {
        let out = text(
            synthetic()
                .call_at(
                    "get_cloudwatch_metrics",
                    json!({"namespace": "AWS/EC2", "metricName": "CPUUtilization", "statistic": "Maximum"}),
                    now(),
                )
                .unwrap(),
        );

        assert!(out.starts_with("CloudWatch メトリクス: AWS/EC2/CPUUtilization\n\n統計値: Maximum\n"));
        assert!(out.contains("データポイント数: 13"));
        assert!(out.contains("2024-05-01T12:00:00.000Z: "));
        assert!(out.contains("\n\n詳細データ:\n{"));

        let detail: serde_json::Value =
            serde_json::from_str(out.split("詳細データ:\n").nth(1).unwrap()).unwrap();
        assert_eq!(detail["metricName"], "CPUUtilization");
        assert_eq!(detail["statistic"], "Maximum");
        assert_eq!(detail["datapoints"].as_array().unwrap().len(), 13);
    }

    #[test]
    fn test_metric_query_source_error_is_prefixed() {
        let err = synthetic()
            .call_at(
                "get_cloudwatch_metrics",
                json!({
                    "namespace": "AWS/EC2",
                    "metricName": "CPUUtilization",
                    "startTime": "2024-05-01T12:00:00Z",
                    "endTime": "2024-05-01T11:00:00Z"
                }),
                now(),
            )
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error executing tool get_cloudwatch_metrics: CloudWatch API エラー: "));
    }

    #[test]
    fn test_metric_list_truncates_after_ten() {
        let out = text(synthetic().call("list_cloudwatch_metrics", json!(null)).unwrap());
        assert!(out.starts_with("利用可能なCloudWatchメトリクス (10個)\n\n• AWS/EC2/CPUUtilization (InstanceId=i-1234567890abcdef0)"));
        assert!(!out.contains("および他"));

        let catalog: Vec<MetricDescriptor> = (0..12)
            .map(|i| MetricDescriptor::new("Custom/App", &format!("Metric{}", i), vec![]))
            .collect();
        let handlers = ToolHandlers::new(Arc::new(SyntheticSource::with_catalog(catalog)));
        let out = text(handlers.call("list_cloudwatch_metrics", json!({})).unwrap());
        assert!(out.contains("• Custom/App/Metric9\n\n... および他2個\n\n詳細データ:"));
        assert!(!out.contains("• Custom/App/Metric10"));
    }

    #[test]
    fn test_metric_list_namespace_filter() {
        let out = text(
            synthetic()
                .call("list_cloudwatch_metrics", json!({"namespace": "AWS/RDS"}))
                .unwrap(),
        );
        assert!(out.starts_with("利用可能なCloudWatchメトリクス (3個)"));
        assert!(!out.contains("AWS/EC2"));
    }

    #[test]
    fn test_ec2_report_text() {
        let out = text(
            synthetic()
                .call_at("get_ec2_cpu_metrics", json!({"instanceId": "i-0abc123", "hours": 2}), now())
                .unwrap(),
        );

        assert!(out.starts_with("EC2インスタンス i-0abc123 のCPU使用率\n\n期間: 過去2時間\n平均CPU使用率: "));
        assert!(out.contains("データポイント数: 25"));
        let recent_block = out
            .split("最新の5つのデータポイント:\n")
            .nth(1)
            .unwrap()
            .split("\n\n詳細データ:")
            .next()
            .unwrap();
        assert_eq!(recent_block.lines().count(), 5);
        assert!(recent_block.lines().all(|l| l.contains("平均") && l.contains("最大")));
    }

    #[test]
    fn test_ec2_report_defaults_to_one_hour() {
        let out = text(
            synthetic()
                .call_at("get_ec2_cpu_metrics", json!({"instanceId": "i-0abc123"}), now())
                .unwrap(),
        );
        assert!(out.contains("期間: 過去1時間"));
        assert!(out.contains("データポイント数: 13"));
    }

    #[test]
    fn test_ec2_report_rejects_bad_hours() {
        for hours in [json!(0), json!(-3), json!(100000)] {
            let err = synthetic()
                .call_at("get_ec2_cpu_metrics", json!({"instanceId": "i-1", "hours": hours}), now())
                .unwrap_err();
            assert!(matches!(err, ToolCallError::InvalidParams(_)));
        }
    }

    #[test]
    fn test_ec2_report_with_no_data() {
        let handlers = ToolHandlers::new(Arc::new(FixtureSource::parse(r#"{"metrics": []}"#).unwrap()));
        let out = text(
            handlers
                .call_at("get_ec2_cpu_metrics", json!({"instanceId": "i-0abc123"}), now())
                .unwrap(),
        );
        assert!(out.contains("平均CPU使用率: 0.00%"));
        assert!(out.contains("データポイント数: 0"));
        assert!(out.ends_with("詳細データ:\n[]"));
    }

    #[test]
    fn test_ec2_report_large_window_is_execution_error() {
        // 200 hours at five minutes exceeds the datapoint limit
        let err = synthetic()
            .call_at("get_ec2_cpu_metrics", json!({"instanceId": "i-1", "hours": 200}), now())
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("EC2 CPU メトリクス取得エラー: You have requested up to 2400 datapoints"));
    }
}
