//! cwchat server
//!
//! A chat front door in front of a CloudWatch tool worker. The same binary
//! runs both sides: the default mode listens for chat clients and bridges
//! to a worker subprocess; `cwchat-server worker` is that subprocess.

pub mod bridge;
pub mod config;
pub mod frontdoor;
pub mod mcp;
pub mod router;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use cwchat_utils::{CwchatError, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use bridge::{BridgeConfig, ProcessBridge};
use config::AppConfig;
use frontdoor::FrontDoor;
use router::{CommandRouter, RouterPolicy};
use worker::WorkerSpec;

/// Argument that switches the binary into worker mode
pub const WORKER_ARG: &str = "worker";

/// Build bridge settings, defaulting the worker to this executable
pub fn bridge_config(config: &AppConfig) -> Result<BridgeConfig> {
    let worker = &config.worker;

    let mut spec = match &worker.command {
        Some(command) => WorkerSpec::new(command.clone()).args(worker.args.iter().cloned()),
        None => {
            let exe = std::env::current_exe()?;
            WorkerSpec::new(exe.to_string_lossy().into_owned())
                .arg(WORKER_ARG)
                .args(worker.args.iter().cloned())
        }
    };

    if let Some(cwd) = &worker.cwd {
        spec = spec.cwd(cwd.clone());
    }
    for (key, value) in &worker.env {
        spec = spec.env(key.clone(), value.clone());
    }
    spec = spec.stop_grace(worker.stop_grace());

    Ok(BridgeConfig {
        worker: spec,
        framing: worker.framing,
        request_timeout: worker.request_timeout(),
        restart_on_timeout: worker.restart_on_timeout,
        max_in_flight: worker.max_in_flight,
    })
}

/// A running front door and the bridge behind it
pub struct Server {
    bridge: Arc<ProcessBridge>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl Server {
    /// Bind the configured address and start accepting clients
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let bridge = Arc::new(ProcessBridge::new(bridge_config(config)?));

        if config.worker.start_eagerly {
            // A worker that fails here is retried on the first request
            if let Err(e) = bridge.start().await {
                warn!(error = %e, "Worker did not start; will retry on demand");
            }
        }

        let addr = config.server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| CwchatError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let policy = RouterPolicy::from(config.router.clone());
        let router = CommandRouter::new(Arc::clone(&bridge), policy);
        let front_door = Arc::new(FrontDoor::new(router, Arc::clone(&bridge)));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = tokio::spawn(frontdoor::run_accept_loop(
            listener,
            front_door,
            shutdown_rx,
        ));

        info!("Server running on {}", local_addr);

        Ok(Self {
            bridge,
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bridge(&self) -> &Arc<ProcessBridge> {
        &self.bridge
    }

    /// Stop accepting clients and stop the worker
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        self.bridge.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwchat_protocol::Framing;

    #[test]
    fn test_bridge_config_uses_configured_command() {
        let mut config = AppConfig::default();
        config.worker.command = Some("node".into());
        config.worker.args = vec!["dist/index.js".into()];
        config.worker.framing = Framing::Document;
        config.worker.request_timeout_ms = 2_500;

        let bridge = bridge_config(&config).unwrap();
        assert_eq!(bridge.worker.program, "node");
        assert_eq!(bridge.worker.args, vec!["dist/index.js".to_string()]);
        assert_eq!(bridge.framing, Framing::Document);
        assert_eq!(bridge.request_timeout.as_millis(), 2_500);
        assert_eq!(bridge.effective_in_flight(), 1);
    }

    #[test]
    fn test_bridge_config_defaults_to_worker_mode() {
        let bridge = bridge_config(&AppConfig::default()).unwrap();
        assert_eq!(bridge.worker.args, vec![WORKER_ARG.to_string()]);
        assert!(!bridge.worker.program.is_empty());
    }
}
