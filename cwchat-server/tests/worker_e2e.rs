//! Bridge and router driving the real tool worker (`cwchat-server worker`)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cwchat_protocol::{Framing, JsonRpcError, ToolResult, ToolsListResult};
use cwchat_server::bridge::{BridgeConfig, ProcessBridge};
use cwchat_server::router::{CommandRouter, RouterPolicy, USAGE};
use cwchat_server::worker::WorkerSpec;
use cwchat_server::WORKER_ARG;
use serde_json::json;
use tempfile::TempDir;

/// Worker spec isolated from any config on the machine running the tests
fn worker_spec(dir: &Path) -> WorkerSpec {
    WorkerSpec::new(env!("CARGO_BIN_EXE_cwchat-server"))
        .arg(WORKER_ARG)
        .env("CWCHAT_CONFIG", dir.join("config.toml").to_string_lossy())
        .env("CWCHAT_FIXTURES", "")
        .stop_grace(Duration::from_millis(500))
}

fn bridge(dir: &Path) -> Arc<ProcessBridge> {
    let mut config = BridgeConfig::new(worker_spec(dir));
    config.request_timeout = Duration::from_secs(10);
    Arc::new(ProcessBridge::new(config))
}

fn text_of(result: serde_json::Value) -> String {
    let result: ToolResult = serde_json::from_value(result).unwrap();
    result.first_text().unwrap().to_string()
}

#[tokio::test]
async fn test_real_worker_lists_tools() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    let response = bridge.send("tools/list", json!({})).await.unwrap();
    let list: ToolsListResult = serde_json::from_value(response.result.unwrap()).unwrap();
    let names: Vec<&str> = list.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["get_cloudwatch_metrics", "list_cloudwatch_metrics", "get_ec2_cpu_metrics"]
    );

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_initialize_and_ping() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    let init = bridge.send("initialize", json!({})).await.unwrap();
    assert_eq!(init.result.unwrap()["protocolVersion"], json!("2024-11-05"));

    let ping = bridge.send("ping", json!({})).await.unwrap();
    assert_eq!(ping.result, Some(json!({})));

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_runs_cpu_report() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    let response = bridge
        .send(
            "tools/call",
            json!({"name": "get_ec2_cpu_metrics", "arguments": {"instanceId": "i-0abc123", "hours": 2}}),
        )
        .await
        .unwrap();

    let text = text_of(response.result.unwrap());
    assert!(text.starts_with("EC2インスタンス i-0abc123 のCPU使用率"));
    assert!(text.contains("期間: 過去2時間"));
    assert!(text.contains("詳細データ:"));

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_reports_tool_errors() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    let unknown = bridge
        .send("tools/call", json!({"name": "delete_alarms", "arguments": {}}))
        .await
        .unwrap();
    assert_eq!(unknown.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

    let invalid = bridge
        .send("tools/call", json!({"name": "get_ec2_cpu_metrics", "arguments": {}}))
        .await
        .unwrap();
    assert_eq!(invalid.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

    // Errors are answers, not failures: the same worker keeps serving
    assert_eq!(bridge.generation(), 1);
    assert!(bridge.is_alive().await);

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_pipelines_concurrent_calls() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    let calls = (0..8).map(|i| {
        let bridge = Arc::clone(&bridge);
        async move {
            let instance = format!("i-{:04}", i);
            let response = bridge
                .send(
                    "tools/call",
                    json!({"name": "get_ec2_cpu_metrics", "arguments": {"instanceId": instance}}),
                )
                .await
                .unwrap();
            (instance, text_of(response.result.unwrap()))
        }
    });

    for (instance, text) in futures::future::join_all(calls).await {
        assert!(text.contains(&instance), "{} missing from {}", instance, text);
    }
    assert_eq!(bridge.generation(), 1);

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_document_framing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[worker]\nframing = \"document\"\n").unwrap();

    let mut config = BridgeConfig::new(worker_spec(dir.path()));
    config.framing = Framing::Document;
    let bridge = ProcessBridge::new(config);

    for _ in 0..3 {
        let response = bridge.send("tools/list", json!({})).await.unwrap();
        assert!(response.result.is_some());
    }

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_real_worker_serves_fixtures() {
    let dir = TempDir::new().unwrap();
    let fixtures = dir.path().join("metrics.json");
    std::fs::write(
        &fixtures,
        json!({
            "metrics": [{
                "Namespace": "Custom/App",
                "MetricName": "Latency",
                "Dimensions": [{"Name": "Service", "Value": "api"}],
                "Datapoints": []
            }]
        })
        .to_string(),
    )
    .unwrap();

    let spec = worker_spec(dir.path()).env("CWCHAT_FIXTURES", fixtures.to_string_lossy());
    let bridge = ProcessBridge::new(BridgeConfig::new(spec));

    let response = bridge
        .send(
            "tools/call",
            json!({"name": "list_cloudwatch_metrics", "arguments": {"namespace": "Custom/App"}}),
        )
        .await
        .unwrap();
    let text = text_of(response.result.unwrap());
    assert!(text.starts_with("利用可能なCloudWatchメトリクス (1個)"));
    assert!(text.contains("• Custom/App/Latency (Service=api)"));

    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_router_scenarios_through_real_worker() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());
    let router = CommandRouter::new(Arc::clone(&bridge), RouterPolicy::default());

    // Unrecognized text never touches the worker
    assert_eq!(router.route("こんにちは").await.unwrap(), USAGE);
    assert_eq!(bridge.generation(), 0);

    let cpu = router
        .route("EC2のCPU使用率を取得して i-0abc123 2時間")
        .await
        .unwrap();
    assert!(cpu.starts_with("EC2インスタンス i-0abc123 のCPU使用率"));
    assert_eq!(bridge.generation(), 1);

    let listing = router.route("CloudWatchメトリクス一覧 AWS/RDS").await.unwrap();
    assert!(listing.starts_with("利用可能なCloudWatchメトリクス"));
    assert!(listing.contains("• AWS/RDS/"));
    assert!(!listing.contains("• AWS/EC2/"));

    let query = router
        .route("CloudWatch AWS/EC2 CPUUtilization メトリクス")
        .await
        .unwrap();
    assert!(query.starts_with("CloudWatch メトリクス: AWS/EC2/CPUUtilization"));

    let tools = router.route("利用可能なツール").await.unwrap();
    assert!(tools.starts_with("利用可能なツール:\n\n• get_cloudwatch_metrics:"));

    assert_eq!(bridge.generation(), 1);
    bridge.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_restarts_after_stop() {
    let dir = TempDir::new().unwrap();
    let bridge = bridge(dir.path());

    bridge.start().await.unwrap();
    assert!(bridge.is_alive().await);
    bridge.stop().await.unwrap();
    assert!(!bridge.is_alive().await);

    let response = bridge.send("ping", json!({})).await.unwrap();
    assert!(response.result.is_some());
    assert_eq!(bridge.generation(), 2);

    bridge.stop().await.unwrap();
}
