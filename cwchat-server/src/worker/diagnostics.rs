//! Worker diagnostic stream

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info};

/// Lines of worker stderr kept for error messages
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Longest diagnostic line kept, in bytes
pub const MAX_DIAGNOSTIC_LINE: usize = 4096;

/// Bounded buffer of the most recent diagnostic lines
#[derive(Debug)]
pub struct DiagnosticTail {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<String> {
        self.lines.lock().back().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::new(DIAGNOSTIC_TAIL_LINES)
    }
}

/// Forward the worker's stderr into the log until EOF
///
/// Never affects request outcomes: bytes that are not UTF-8 are replaced,
/// overlong lines are cut at [`MAX_DIAGNOSTIC_LINE`], and the pipe keeps
/// being drained so the worker never blocks on it.
pub async fn drain_diagnostics<R>(stream: R, generation: u64, tail: Arc<DiagnosticTail>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line: Vec<u8> = Vec::new();
    let mut truncated = false;

    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(generation, error = %e, "Worker diagnostic stream failed");
                break;
            }
        };

        if chunk.is_empty() {
            emit_line(&line, truncated, generation, &tail);
            break;
        }

        let (taken, complete) = match chunk.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos, true),
            None => (chunk.len(), false),
        };

        let room = MAX_DIAGNOSTIC_LINE.saturating_sub(line.len());
        line.extend_from_slice(&chunk[..taken.min(room)]);
        truncated |= taken > room;

        let consumed = if complete { taken + 1 } else { taken };
        reader.consume(consumed);

        if complete {
            emit_line(&line, truncated, generation, &tail);
            line.clear();
            truncated = false;
        }
    }
    debug!(generation, "Worker diagnostic stream closed");
}

fn emit_line(bytes: &[u8], truncated: bool, generation: u64, tail: &DiagnosticTail) {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        return;
    }

    let line = if truncated {
        format!("{}...", text)
    } else {
        text.to_string()
    };
    info!(target: "cwchat::worker", generation, "{}", line);
    tail.push(line);
}
