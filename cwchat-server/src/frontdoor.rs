//! TCP front door
//!
//! Chat clients connect over TCP and exchange newline-delimited JSON events.
//! Chat text goes through the [`CommandRouter`]; raw JSON-RPC requests are
//! forwarded to the worker untouched.

use std::sync::Arc;

use cwchat_protocol::{ClientEvent, Framing, ServerEvent, ServerEventCodec};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::router::{CommandRouter, ToolExecutor};

/// Answers client events
pub struct FrontDoor<E> {
    router: CommandRouter<E>,
    executor: Arc<E>,
}

impl<E: ToolExecutor> FrontDoor<E> {
    pub fn new(router: CommandRouter<E>, executor: Arc<E>) -> Self {
        Self { router, executor }
    }

    /// Produce the single reply for one inbound event
    pub async fn handle_event(&self, event: ClientEvent) -> ServerEvent {
        match event {
            ClientEvent::ChatMessage { message } => match self.router.route(&message).await {
                Ok(text) => ServerEvent::chat_success(text),
                Err(e) => {
                    warn!(error = %e, "Chat message failed");
                    ServerEvent::chat_error(format!("エラー: {}", e))
                }
            },
            ClientEvent::McpRequest { request } => match self.executor.execute(request).await {
                Ok(response) => ServerEvent::McpResponse { response },
                Err(e) => {
                    warn!(error = %e, "Forwarded request failed");
                    ServerEvent::mcp_error(e.to_string())
                }
            },
        }
    }
}

/// Accept connections until shutdown is broadcast
pub async fn run_accept_loop<E>(
    listener: TcpListener,
    front_door: Arc<FrontDoor<E>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    E: ToolExecutor + 'static,
{
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let conn_id = Uuid::new_v4();
                        debug!(%conn_id, %peer_addr, "New connection");
                        let front_door = Arc::clone(&front_door);
                        let shutdown_rx = shutdown_rx.resubscribe();
                        tokio::spawn(async move {
                            handle_connection(stream, conn_id, front_door, shutdown_rx).await;
                        });
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}

async fn handle_connection<E: ToolExecutor>(
    stream: TcpStream,
    conn_id: Uuid,
    front_door: Arc<FrontDoor<E>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, ServerEventCodec::new(Framing::Lines));

    loop {
        let event = tokio::select! {
            next = framed.next() => next,
            _ = shutdown_rx.recv() => break,
        };

        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(%conn_id, error = %e, "Dropping connection after read error");
                break;
            }
            None => break,
        };

        let reply = front_door.handle_event(event).await;
        if let Err(e) = framed.send(reply).await {
            warn!(%conn_id, error = %e, "Failed to write reply");
            break;
        }
    }

    debug!(%conn_id, "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeError;
    use crate::router::RouterPolicy;
    use cwchat_protocol::{ChatStatus, ClientEventCodec, JsonRpcResponse, ToolResult};
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Answers every call with the same text, or fails every call
    struct FakeExecutor {
        fail: bool,
    }

    impl ToolExecutor for FakeExecutor {
        async fn call(&self, _method: &str, _params: Value) -> Result<JsonRpcResponse, BridgeError> {
            if self.fail {
                return Err(BridgeError::worker_failure("worker exited"));
            }
            Ok(JsonRpcResponse::success(
                json!(1),
                serde_json::to_value(ToolResult::text("📊 CPU 12.50%")).unwrap(),
            ))
        }

        async fn execute(&self, request: Value) -> Result<Value, BridgeError> {
            if self.fail {
                return Err(BridgeError::worker_failure("worker exited"));
            }
            Ok(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"echo": request["method"]}}))
        }
    }

    fn front_door(fail: bool) -> Arc<FrontDoor<FakeExecutor>> {
        let executor = Arc::new(FakeExecutor { fail });
        let router = CommandRouter::new(Arc::clone(&executor), RouterPolicy::default());
        Arc::new(FrontDoor::new(router, executor))
    }

    fn chat(message: &str) -> ClientEvent {
        ClientEvent::ChatMessage {
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_chat_success() {
        let reply = front_door(false).handle_event(chat("EC2のCPU使用率")).await;
        assert_eq!(reply, ServerEvent::chat_success("📊 CPU 12.50%"));
    }

    #[tokio::test]
    async fn test_chat_error_is_prefixed() {
        let reply = front_door(true).handle_event(chat("EC2のCPU使用率")).await;
        match reply {
            ServerEvent::ChatResponse { status, message } => {
                assert_eq!(status, ChatStatus::Error);
                assert!(message.starts_with("エラー: コマンド実行エラー: worker failure"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mcp_request_passes_through() {
        let reply = front_door(false)
            .handle_event(ClientEvent::McpRequest {
                request: json!({"jsonrpc": "2.0", "id": "abc", "method": "tools/list"}),
            })
            .await;
        assert_eq!(
            reply,
            ServerEvent::McpResponse {
                response: json!({"jsonrpc": "2.0", "id": "abc", "result": {"echo": "tools/list"}})
            }
        );
    }

    #[tokio::test]
    async fn test_mcp_failure_is_wrapped() {
        let reply = front_door(true)
            .handle_event(ClientEvent::McpRequest {
                request: json!({"id": 1, "method": "tools/list"}),
            })
            .await;
        assert_eq!(reply, ServerEvent::mcp_error("worker failure: worker exited"));
    }

    #[tokio::test]
    async fn test_events_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_accept_loop(listener, front_door(false), shutdown_rx));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, ClientEventCodec::new(Framing::Lines));

        framed.send(chat("こんにちは")).await.unwrap();
        framed.send(chat("EC2 CPU")).await.unwrap();

        let first = framed.next().await.unwrap().unwrap();
        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(first, ServerEvent::chat_success(crate::router::USAGE));
        assert_eq!(second, ServerEvent::chat_success("📊 CPU 12.50%"));

        let _ = shutdown_tx.send(());
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "accept loop did not shut down");
    }

    #[tokio::test]
    async fn test_accept_loop_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_accept_loop(listener, front_door(false), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "accept loop did not shut down");
    }
}
