//! Front-door client
//!
//! One request, one reply: the server answers every event exactly once and
//! in order, so the client simply sends and then waits.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use cwchat_protocol::{ClientEvent, ClientEventCodec, Framing, ServerEvent};
use cwchat_utils::{CwchatError, Result};

/// Connection to a cwchat server
pub struct Client {
    framed: Framed<TcpStream, ClientEventCodec>,
    response_timeout: Duration,
}

impl Client {
    pub async fn connect(addr: &str, response_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CwchatError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        debug!(%addr, "Connected");

        Ok(Self {
            framed: Framed::new(stream, ClientEventCodec::new(Framing::Lines)),
            response_timeout,
        })
    }

    pub async fn send(&mut self, event: ClientEvent) -> Result<()> {
        self.framed
            .send(event)
            .await
            .map_err(|e| CwchatError::Connection(format!("Failed to send: {}", e)))
    }

    /// Receive one event with timeout
    pub async fn recv(&mut self) -> Result<ServerEvent> {
        match timeout(self.response_timeout, self.framed.next()).await {
            Ok(Some(Ok(event))) => Ok(event),
            Ok(Some(Err(e))) => Err(CwchatError::Connection(format!("Failed to receive: {}", e))),
            Ok(None) => Err(CwchatError::ConnectionClosed),
            Err(_) => Err(CwchatError::Connection("Response timeout".to_string())),
        }
    }

    pub async fn request(&mut self, event: ClientEvent) -> Result<ServerEvent> {
        self.send(event).await?;
        self.recv().await
    }

    pub async fn chat(&mut self, message: impl Into<String>) -> Result<ServerEvent> {
        self.request(ClientEvent::ChatMessage {
            message: message.into(),
        })
        .await
    }

    pub async fn mcp(&mut self, request: serde_json::Value) -> Result<ServerEvent> {
        self.request(ClientEvent::McpRequest { request }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwchat_protocol::ServerEventCodec;
    use tokio::net::TcpListener;

    /// Serve one connection, answering each chat message with its text reversed
    async fn spawn_server(reply: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerEventCodec::new(Framing::Lines));
            while let Some(Ok(event)) = framed.next().await {
                if !reply {
                    continue;
                }
                let answer = match event {
                    ClientEvent::ChatMessage { message } => {
                        ServerEvent::chat_success(message.chars().rev().collect::<String>())
                    }
                    ClientEvent::McpRequest { request } => {
                        ServerEvent::McpResponse { response: request }
                    }
                };
                framed.send(answer).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_chat_and_mcp() {
        let addr = spawn_server(true).await;
        let mut client = Client::connect(&addr, Duration::from_secs(5)).await.unwrap();

        assert_eq!(client.chat("abc").await.unwrap(), ServerEvent::chat_success("cba"));

        let request = serde_json::json!({"id": 1, "method": "ping"});
        assert_eq!(
            client.mcp(request.clone()).await.unwrap(),
            ServerEvent::McpResponse { response: request }
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let addr = spawn_server(false).await;
        let mut client = Client::connect(&addr, Duration::from_millis(100)).await.unwrap();

        let err = client.chat("hello").await.unwrap_err();
        assert!(err.to_string().contains("Response timeout"));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Client::connect(&addr, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, CwchatError::Connection(_)));
    }
}
