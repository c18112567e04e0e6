//! Configuration schema structs

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use cwchat_protocol::Framing;
use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub router: RouterConfig,
    pub metrics: MetricsConfig,
}

/// Front door listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0)
    pub bind: String,
    /// TCP port (default: 3000, overridden by `PORT`)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Worker process and bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable to spawn. Defaults to this binary in `worker` mode.
    pub command: Option<String>,
    /// Arguments for `command` (ignored when `command` is unset)
    pub args: Vec<String>,
    /// Working directory for the worker
    pub cwd: Option<PathBuf>,
    /// Extra environment for the worker
    pub env: HashMap<String, String>,
    /// Stream framing between bridge and worker
    pub framing: Framing,
    /// Per-request deadline in milliseconds
    pub request_timeout_ms: u64,
    /// Kill and respawn the worker after a timed-out request
    pub restart_on_timeout: bool,
    /// Maximum concurrent requests (forced to 1 for document framing)
    pub max_in_flight: usize,
    /// Time between SIGTERM and SIGKILL when stopping the worker
    pub stop_grace_ms: u64,
    /// Spawn the worker at startup rather than on first request
    pub start_eagerly: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            framing: Framing::Lines,
            request_timeout_ms: 10_000,
            restart_on_timeout: true,
            max_in_flight: 32,
            stop_grace_ms: 2_000,
            start_eagerly: true,
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Command router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Reject CPU reports that name no instance instead of using the default
    pub strict: bool,
    pub default_instance_id: String,
    pub default_namespace: String,
    pub default_metric: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict: false,
            default_instance_id: "i-1234567890abcdef0".into(),
            default_namespace: "AWS/EC2".into(),
            default_metric: "CPUUtilization".into(),
        }
    }
}

/// Metrics source used by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// JSON fixture file; synthetic data is served when unset
    pub fixtures: Option<PathBuf>,
    /// Region label reported by the worker
    pub region: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            fixtures: None,
            region: "us-east-1".into(),
        }
    }
}
