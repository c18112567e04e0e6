//! Bridge error types

use std::time::Duration;

use cwchat_protocol::CodecError;

/// Failures of a bridged request or of the worker lifecycle
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The worker could not be launched
    #[error("failed to start worker '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// The worker died or its pipes failed while the call was in flight
    #[error("worker failure: {0}")]
    WorkerFailure(String),

    /// No response before the deadline
    #[error("MCP request timeout after {}ms ({method})", .timeout.as_millis())]
    Timeout { method: String, timeout: Duration },

    /// The request could not be encoded or the raw request was malformed
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    pub fn worker_failure(msg: impl Into<String>) -> Self {
        Self::WorkerFailure(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<CodecError> for BridgeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Json(e) => Self::Protocol(e.to_string()),
            other => Self::WorkerFailure(other.to_string()),
        }
    }
}

impl From<BridgeError> for cwchat_utils::CwchatError {
    fn from(err: BridgeError) -> Self {
        cwchat_utils::CwchatError::worker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = BridgeError::Timeout {
            method: "tools/call".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "MCP request timeout after 10000ms (tools/call)");
    }

    #[test]
    fn test_spawn_display() {
        let err = BridgeError::Spawn {
            program: "/no/such/worker".into(),
            reason: "No such file or directory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/no/such/worker"));
    }

    #[test]
    fn test_codec_error_conversion() {
        let err: BridgeError = CodecError::MessageTooLarge { size: 10, max: 5 }.into();
        assert!(matches!(err, BridgeError::WorkerFailure(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: BridgeError = CodecError::Io(io).into();
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_into_process_error() {
        let err: cwchat_utils::CwchatError = BridgeError::worker_failure("exited").into();
        assert!(matches!(err, cwchat_utils::CwchatError::Worker(_)));
    }
}
