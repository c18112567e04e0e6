//! Chat text classification
//!
//! An ordered rule table: each rule is a predicate over the lowercased text
//! and an extractor over the text as typed. The first matching rule decides
//! the route.

use cwchat_protocol::{ToolInvocation, ToolName};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::RouterConfig;

lazy_static! {
    static ref INSTANCE_ID: Regex = Regex::new(r"i-[a-zA-Z0-9]+").unwrap();
    static ref HOURS: Regex = Regex::new(r"([0-9]+)\s*時間").unwrap();
    static ref NAMESPACE: Regex = Regex::new(r"(?i)AWS/[A-Z0-9]+").unwrap();
    static ref CAPITALIZED_WORD: Regex = Regex::new(r"[A-Z][a-zA-Z]+").unwrap();
}

/// Word that only signals "this is about CloudWatch"
const CLOUDWATCH_CUE: &str = "cloudwatch";

/// Defaults and strictness applied while extracting arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterPolicy {
    pub strict: bool,
    pub default_instance_id: String,
    pub default_namespace: String,
    pub default_metric: String,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        RouterConfig::default().into()
    }
}

impl From<RouterConfig> for RouterPolicy {
    fn from(config: RouterConfig) -> Self {
        Self {
            strict: config.strict,
            default_instance_id: config.default_instance_id,
            default_namespace: config.default_namespace,
            default_metric: config.default_metric,
        }
    }
}

/// What to do with a chat message
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// List the worker's tools
    ListTools,
    /// Run one tool
    Invoke(ToolInvocation),
    /// Nothing matched; answer with usage text
    Help,
    /// A rule matched but strict parsing refused to guess
    Rejected(String),
}

struct Rule {
    name: &'static str,
    matches: fn(&str) -> bool,
    extract: fn(&str, &RouterPolicy) -> Route,
}

const RULES: &[Rule] = &[
    Rule {
        name: "tool listing",
        matches: is_tool_listing,
        extract: list_tools,
    },
    Rule {
        name: "ec2 cpu report",
        matches: is_ec2_cpu_report,
        extract: ec2_cpu_report,
    },
    Rule {
        name: "metric listing",
        matches: is_metric_listing,
        extract: metric_listing,
    },
    Rule {
        name: "metric query",
        matches: is_metric_query,
        extract: metric_query,
    },
];

/// Map chat text to a route; deterministic and side-effect free
pub fn classify(text: &str, policy: &RouterPolicy) -> Route {
    let lower = text.to_lowercase();
    RULES
        .iter()
        .find(|rule| (rule.matches)(&lower))
        .map(|rule| {
            tracing::trace!(rule = rule.name, "Chat rule matched");
            (rule.extract)(text, policy)
        })
        .unwrap_or(Route::Help)
}

fn is_tool_listing(lower: &str) -> bool {
    ["ツール", "機能", "help"].iter().any(|cue| lower.contains(cue))
}

fn is_ec2_cpu_report(lower: &str) -> bool {
    lower.contains("ec2") && lower.contains("cpu")
}

fn is_metric_listing(lower: &str) -> bool {
    lower.contains("メトリクス") && lower.contains("一覧")
}

fn is_metric_query(lower: &str) -> bool {
    lower.contains(CLOUDWATCH_CUE) || lower.contains("メトリクス")
}

fn list_tools(_text: &str, _policy: &RouterPolicy) -> Route {
    Route::ListTools
}

fn ec2_cpu_report(text: &str, policy: &RouterPolicy) -> Route {
    let instance_id = match INSTANCE_ID.find(text) {
        Some(m) => m.as_str().to_string(),
        None if policy.strict => {
            return Route::Rejected(
                "インスタンスIDを指定してください (例: i-1234567890abcdef0)".to_string(),
            )
        }
        None => policy.default_instance_id.clone(),
    };

    // Out-of-range numbers fall back to the default like a missing one
    let hours = HOURS
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(1);

    Route::Invoke(
        ToolInvocation::new(ToolName::Ec2CpuReport)
            .arg("instanceId", instance_id)
            .arg("hours", hours),
    )
}

fn metric_listing(text: &str, _policy: &RouterPolicy) -> Route {
    let mut invocation = ToolInvocation::new(ToolName::MetricList);
    if let Some(namespace) = NAMESPACE.find(text) {
        invocation = invocation.arg("namespace", namespace.as_str());
    }
    Route::Invoke(invocation)
}

fn metric_query(text: &str, policy: &RouterPolicy) -> Route {
    let namespace = NAMESPACE.find(text);

    let metric_name = CAPITALIZED_WORD
        .find_iter(text)
        .filter(|word| {
            namespace
                .map(|ns| word.start() >= ns.end() || word.end() <= ns.start())
                .unwrap_or(true)
        })
        .map(|word| word.as_str())
        .find(|word| !word.eq_ignore_ascii_case(CLOUDWATCH_CUE))
        .unwrap_or(policy.default_metric.as_str());

    let namespace = namespace
        .map(|m| m.as_str())
        .unwrap_or(policy.default_namespace.as_str());

    Route::Invoke(
        ToolInvocation::new(ToolName::MetricQuery)
            .arg("namespace", namespace)
            .arg("metricName", metric_name),
    )
}
