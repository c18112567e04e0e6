//! Metrics sources
//!
//! The worker answers tool calls from a [`MetricsSource`]. Two are provided:
//! [`FixtureSource`] serves recorded series from a JSON file, and
//! [`SyntheticSource`] generates stable values from the query itself so the
//! same question always gets the same answer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MetricsConfig;

/// CloudWatch rejects queries that would return more points than this
pub const MAX_DATAPOINTS: i64 = 1440;

/// Errors from a metrics source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read fixtures {path}: {source}")]
    FixtureRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid fixtures {path}: {source}")]
    FixtureParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    InvalidQuery(String),
}

/// A metric dimension (`Name=Value`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Aggregation applied to a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Statistic {
    #[default]
    Average,
    Sum,
    Maximum,
    Minimum,
    SampleCount,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Average => "Average",
            Statistic::Sum => "Sum",
            Statistic::Maximum => "Maximum",
            Statistic::Minimum => "Minimum",
            Statistic::SampleCount => "SampleCount",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Average" => Ok(Statistic::Average),
            "Sum" => Ok(Statistic::Sum),
            "Maximum" => Ok(Statistic::Maximum),
            "Minimum" => Ok(Statistic::Minimum),
            "SampleCount" => Ok(Statistic::SampleCount),
            other => Err(format!(
                "unknown statistic '{}' (expected Average, Sum, Maximum, Minimum or SampleCount)",
                other
            )),
        }
    }
}

/// One aggregated period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<f64>,
    #[serde(default)]
    pub unit: String,
}

impl Datapoint {
    pub fn value(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Average => self.average,
            Statistic::Sum => self.sum,
            Statistic::Maximum => self.maximum,
            Statistic::Minimum => self.minimum,
            Statistic::SampleCount => self.sample_count,
        }
    }

    /// Keep only the requested statistics
    fn project(mut self, statistics: &[Statistic]) -> Self {
        let keep = |s: Statistic, v: Option<f64>| if statistics.contains(&s) { v } else { None };
        self.average = keep(Statistic::Average, self.average);
        self.sum = keep(Statistic::Sum, self.sum);
        self.maximum = keep(Statistic::Maximum, self.maximum);
        self.minimum = keep(Statistic::Minimum, self.minimum);
        self.sample_count = keep(Statistic::SampleCount, self.sample_count);
        self
    }
}

/// A metric that exists in a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricDescriptor {
    pub namespace: String,
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl MetricDescriptor {
    pub fn new(namespace: &str, metric_name: &str, dimensions: Vec<Dimension>) -> Self {
        Self {
            namespace: namespace.to_string(),
            metric_name: metric_name.to_string(),
            dimensions,
        }
    }

    fn same_dimensions(&self, other: &[Dimension]) -> bool {
        let mut mine = self.dimensions.clone();
        let mut theirs = other.to_vec();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

/// Optional filters for [`MetricsSource::list_metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricFilter {
    pub namespace: Option<String>,
    pub metric_name: Option<String>,
}

impl MetricFilter {
    fn matches(&self, metric: &MetricDescriptor) -> bool {
        self.namespace
            .as_ref()
            .map_or(true, |ns| *ns == metric.namespace)
            && self
                .metric_name
                .as_ref()
                .map_or(true, |name| *name == metric.metric_name)
    }
}

/// Parameters of a statistics query
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period_secs: u32,
    pub statistics: Vec<Statistic>,
}

impl StatisticsQuery {
    /// Reject windows CloudWatch itself would refuse
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.period_secs == 0 {
            return Err(SourceError::InvalidQuery("period must be greater than 0".into()));
        }
        if self.start >= self.end {
            return Err(SourceError::InvalidQuery(format!(
                "start time {} must be before end time {}",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        let requested = (self.end - self.start).num_seconds() / i64::from(self.period_secs);
        if requested > MAX_DATAPOINTS {
            return Err(SourceError::InvalidQuery(format!(
                "You have requested up to {} datapoints, which exceeds the limit of {}",
                requested, MAX_DATAPOINTS
            )));
        }
        Ok(())
    }

    fn describes(&self, metric: &MetricDescriptor) -> bool {
        metric.namespace == self.namespace
            && metric.metric_name == self.metric_name
            && metric.same_dimensions(&self.dimensions)
    }
}

/// Where the worker gets metric data from
pub trait MetricsSource: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    fn list_metrics(&self, filter: &MetricFilter) -> Result<Vec<MetricDescriptor>, SourceError>;

    fn get_metric_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>, SourceError>;
}

/// Build the source described by the configuration
pub fn from_config(config: &MetricsConfig) -> Result<Arc<dyn MetricsSource>, SourceError> {
    let source: Arc<dyn MetricsSource> = match &config.fixtures {
        Some(path) => Arc::new(FixtureSource::load(path)?),
        None => Arc::new(SyntheticSource::default()),
    };
    info!(source = source.name(), region = %config.region, "Metrics source ready");
    Ok(source)
}

// ==================== Fixtures ====================

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    metrics: Vec<FixtureSeries>,
}

#[derive(Debug, Deserialize)]
struct FixtureSeries {
    #[serde(flatten)]
    metric: MetricDescriptor,
    #[serde(rename = "Datapoints", default)]
    datapoints: Vec<Datapoint>,
}

/// Recorded series loaded from a JSON file
///
/// ```json
/// {"metrics": [{"Namespace": "AWS/EC2", "MetricName": "CPUUtilization",
///   "Dimensions": [{"Name": "InstanceId", "Value": "i-0abc123"}],
///   "Datapoints": [{"Timestamp": "2024-05-01T10:00:00Z", "Average": 12.5, "Unit": "Percent"}]}]}
/// ```
#[derive(Debug)]
pub struct FixtureSource {
    series: Vec<FixtureSeries>,
}

impl FixtureSource {
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::FixtureRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let source = Self::parse(&content).map_err(|e| SourceError::FixtureParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(path = %path.display(), series = source.series.len(), "Loaded metric fixtures");
        Ok(source)
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let file: FixtureFile = serde_json::from_str(content)?;
        Ok(Self {
            series: file.metrics,
        })
    }
}

impl MetricsSource for FixtureSource {
    fn name(&self) -> &str {
        "fixtures"
    }

    fn list_metrics(&self, filter: &MetricFilter) -> Result<Vec<MetricDescriptor>, SourceError> {
        Ok(self
            .series
            .iter()
            .map(|s| &s.metric)
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    fn get_metric_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>, SourceError> {
        query.validate()?;
        Ok(self
            .series
            .iter()
            .filter(|s| query.describes(&s.metric))
            .flat_map(|s| s.datapoints.iter())
            .filter(|p| p.timestamp >= query.start && p.timestamp <= query.end)
            .map(|p| p.clone().project(&query.statistics))
            .collect())
    }
}

// ==================== Synthetic ====================

/// Deterministic stand-in for CloudWatch
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    catalog: Vec<MetricDescriptor>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        let instance = || vec![Dimension::new("InstanceId", "i-1234567890abcdef0")];
        let database = || vec![Dimension::new("DBInstanceIdentifier", "database-1")];
        let function = || vec![Dimension::new("FunctionName", "report-handler")];

        Self {
            catalog: vec![
                MetricDescriptor::new("AWS/EC2", "CPUUtilization", instance()),
                MetricDescriptor::new("AWS/EC2", "NetworkIn", instance()),
                MetricDescriptor::new("AWS/EC2", "NetworkOut", instance()),
                MetricDescriptor::new("AWS/EC2", "StatusCheckFailed", instance()),
                MetricDescriptor::new("AWS/RDS", "CPUUtilization", database()),
                MetricDescriptor::new("AWS/RDS", "FreeStorageSpace", database()),
                MetricDescriptor::new("AWS/RDS", "DatabaseConnections", database()),
                MetricDescriptor::new("AWS/Lambda", "Invocations", function()),
                MetricDescriptor::new("AWS/Lambda", "Errors", function()),
                MetricDescriptor::new("AWS/Lambda", "Duration", function()),
            ],
        }
    }
}

impl SyntheticSource {
    pub fn with_catalog(catalog: Vec<MetricDescriptor>) -> Self {
        Self { catalog }
    }
}

impl MetricsSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn list_metrics(&self, filter: &MetricFilter) -> Result<Vec<MetricDescriptor>, SourceError> {
        Ok(self
            .catalog
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect())
    }

    fn get_metric_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>, SourceError> {
        query.validate()?;

        let period = i64::from(query.period_secs);
        let seed = series_seed(query);
        let unit = unit_for(&query.metric_name);
        let scale = match unit {
            "Percent" => 1.0,
            "Bytes" => 50_000.0,
            "Milliseconds" => 20.0,
            _ => 4.0,
        };
        let samples = (period / 60).max(1) as f64;

        // Period boundaries are absolute so overlapping windows agree
        let first = query.start.timestamp().div_euclid(period) * period;
        let first = if first < query.start.timestamp() { first + period } else { first };

        let mut points = Vec::new();
        let mut at = first;
        while at <= query.end.timestamp() {
            let Some(timestamp) = DateTime::from_timestamp(at, 0) else {
                break;
            };

            let phase = (at / period) as f64 * 0.35 + (seed % 628) as f64 / 100.0;
            let base = 15.0 + (seed % 40) as f64;
            let average = clamp_for(unit, (base + 18.0 * phase.sin()) * scale);
            let spread = (4.0 + 8.0 * phase.cos().abs()) * scale;
            let maximum = clamp_for(unit, average + spread);
            let minimum = clamp_for(unit, average - spread);

            points.push(
                Datapoint {
                    timestamp,
                    average: Some(round2(average)),
                    sum: Some(round2(average * samples)),
                    maximum: Some(round2(maximum)),
                    minimum: Some(round2(minimum)),
                    sample_count: Some(samples),
                    unit: unit.to_string(),
                }
                .project(&query.statistics),
            );
            at += period;
        }

        Ok(points)
    }
}

fn unit_for(metric_name: &str) -> &'static str {
    if metric_name.contains("Utilization") || metric_name.ends_with("Percent") {
        "Percent"
    } else if metric_name.starts_with("Network")
        || metric_name.contains("Bytes")
        || metric_name.contains("Storage")
    {
        "Bytes"
    } else if metric_name == "Duration" || metric_name.contains("Latency") {
        "Milliseconds"
    } else {
        "Count"
    }
}

fn clamp_for(unit: &str, value: f64) -> f64 {
    if unit == "Percent" {
        value.clamp(0.0, 100.0)
    } else {
        value.max(0.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// FNV-1a over the series identity
fn series_seed(query: &StatisticsQuery) -> u64 {
    let mut dimensions = query.dimensions.clone();
    dimensions.sort();

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut feed = |s: &str| {
        for byte in s.bytes().chain(std::iter::once(0)) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
    };
    feed(&query.namespace);
    feed(&query.metric_name);
    for d in &dimensions {
        feed(&d.name);
        feed(&d.value);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cpu_query(hours: i64) -> StatisticsQuery {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        StatisticsQuery {
            namespace: "AWS/EC2".into(),
            metric_name: "CPUUtilization".into(),
            dimensions: vec![Dimension::new("InstanceId", "i-0abc123")],
            start: end - chrono::Duration::hours(hours),
            end,
            period_secs: 300,
            statistics: vec![Statistic::Average, Statistic::Maximum],
        }
    }

    const FIXTURES: &str = r#"{
        "metrics": [
            {
                "Namespace": "AWS/EC2",
                "MetricName": "CPUUtilization",
                "Dimensions": [{"Name": "InstanceId", "Value": "i-0abc123"}],
                "Datapoints": [
                    {"Timestamp": "2024-05-01T11:50:00Z", "Average": 20.0, "Maximum": 35.5, "Unit": "Percent"},
                    {"Timestamp": "2024-05-01T11:00:00Z", "Average": 10.0, "Maximum": 15.0, "Minimum": 2.0, "Unit": "Percent"},
                    {"Timestamp": "2024-04-30T00:00:00Z", "Average": 99.0, "Maximum": 99.0, "Unit": "Percent"}
                ]
            },
            {
                "Namespace": "AWS/RDS",
                "MetricName": "FreeStorageSpace",
                "Dimensions": [{"Name": "DBInstanceIdentifier", "Value": "database-1"}]
            }
        ]
    }"#;

    #[test]
    fn test_statistic_parsing() {
        assert_eq!("Maximum".parse::<Statistic>().unwrap(), Statistic::Maximum);
        assert!("max".parse::<Statistic>().is_err());
        assert_eq!(Statistic::default(), Statistic::Average);
    }

    #[test]
    fn test_query_validation() {
        assert!(cpu_query(1).validate().is_ok());

        let mut reversed = cpu_query(1);
        std::mem::swap(&mut reversed.start, &mut reversed.end);
        assert!(matches!(reversed.validate(), Err(SourceError::InvalidQuery(_))));

        // 200 hours at 5 minutes is 2400 points
        let err = cpu_query(200).validate().unwrap_err();
        assert!(err.to_string().contains("exceeds the limit of 1440"));
    }

    #[test]
    fn test_fixture_statistics_filter_window_and_project() {
        let source = FixtureSource::parse(FIXTURES).unwrap();
        let mut query = cpu_query(1);
        query.statistics = vec![Statistic::Average];

        let points = source.get_metric_statistics(&query).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.maximum.is_none() && p.minimum.is_none()));
        assert!(points.iter().any(|p| p.average == Some(20.0)));
    }

    #[test]
    fn test_fixture_dimensions_must_match() {
        let source = FixtureSource::parse(FIXTURES).unwrap();
        let mut query = cpu_query(1);
        query.dimensions = vec![Dimension::new("InstanceId", "i-other")];
        assert!(source.get_metric_statistics(&query).unwrap().is_empty());
    }

    #[test]
    fn test_fixture_listing_filters() {
        let source = FixtureSource::parse(FIXTURES).unwrap();
        assert_eq!(source.list_metrics(&MetricFilter::default()).unwrap().len(), 2);

        let rds = source
            .list_metrics(&MetricFilter {
                namespace: Some("AWS/RDS".into()),
                metric_name: None,
            })
            .unwrap();
        assert_eq!(rds.len(), 1);
        assert_eq!(rds[0].metric_name, "FreeStorageSpace");
    }

    #[test]
    fn test_fixture_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FixtureSource::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, SourceError::FixtureRead { .. }));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let broken = FixtureSource::load(&path).unwrap_err();
        assert!(matches!(broken, SourceError::FixtureParse { .. }));
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let source = SyntheticSource::default();
        let first = source.get_metric_statistics(&cpu_query(2)).unwrap();
        let second = source.get_metric_statistics(&cpu_query(2)).unwrap();
        assert_eq!(first, second);
        // 2 hours at 5 minutes, both ends inclusive
        assert_eq!(first.len(), 25);
    }

    #[test]
    fn test_synthetic_values_are_plausible() {
        let points = SyntheticSource::default()
            .get_metric_statistics(&cpu_query(6))
            .unwrap();

        for point in &points {
            let average = point.average.unwrap();
            let maximum = point.maximum.unwrap();
            assert!((0.0..=100.0).contains(&average));
            assert!(maximum >= average);
            assert!(point.minimum.is_none());
            assert_eq!(point.unit, "Percent");
        }
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_synthetic_series_differ_by_dimension() {
        let source = SyntheticSource::default();
        let a = source.get_metric_statistics(&cpu_query(1)).unwrap();
        let mut other = cpu_query(1);
        other.dimensions = vec![Dimension::new("InstanceId", "i-fffffff")];
        let b = source.get_metric_statistics(&other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_synthetic_listing() {
        let source = SyntheticSource::default();
        let ec2 = source
            .list_metrics(&MetricFilter {
                namespace: Some("AWS/EC2".into()),
                metric_name: Some("CPUUtilization".into()),
            })
            .unwrap();
        assert_eq!(ec2.len(), 1);
        assert_eq!(ec2[0].dimensions[0].to_string(), "InstanceId=i-1234567890abcdef0");
    }

    #[test]
    fn test_units() {
        assert_eq!(unit_for("CPUUtilization"), "Percent");
        assert_eq!(unit_for("NetworkIn"), "Bytes");
        assert_eq!(unit_for("Duration"), "Milliseconds");
        assert_eq!(unit_for("Invocations"), "Count");
    }
}
