//! Message codec for stdio and socket framing
//!
//! Two framings are supported:
//!
//! - [`Framing::Lines`]: one JSON document per line. Safe for pipelining
//!   many requests on one stream.
//! - [`Framing::Document`]: documents are written back to back with no
//!   delimiter; the decoder accumulates bytes and yields a document as soon
//!   as one parses completely. Only safe with one outstanding request.
//!
//! Malformed documents are logged and skipped so a single stray write from
//! the peer does not tear down the stream. Oversized frames are fatal.

use std::marker::PhantomData;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::events::{ClientEvent, ServerEvent};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

/// Maximum message size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Longest slice of a malformed frame echoed into logs
const LOG_PREVIEW_BYTES: usize = 256;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// How documents are delimited on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Newline-delimited JSON
    #[default]
    Lines,
    /// Self-delimiting JSON documents with no separator
    Document,
}

impl Framing {
    /// Whether more than one request may be outstanding on the stream
    pub fn supports_pipelining(&self) -> bool {
        matches!(self, Self::Lines)
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lines" | "ndjson" => Ok(Self::Lines),
            "document" | "json" => Ok(Self::Document),
            other => Err(format!("unknown framing '{}'", other)),
        }
    }
}

/// JSON codec decoding `D` and encoding `E`
pub struct WireCodec<D, E> {
    framing: Framing,
    /// Bytes of the current partial line already searched for a newline
    next_index: usize,
    _marker: PhantomData<fn() -> (D, E)>,
}

impl<D, E> WireCodec<D, E> {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            next_index: 0,
            _marker: PhantomData,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }
}

impl<D, E> Default for WireCodec<D, E> {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

impl<D, E> std::fmt::Debug for WireCodec<D, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireCodec")
            .field("framing", &self.framing)
            .finish()
    }
}

/// Bridge side: writes requests to the worker, reads its responses
pub type BridgeCodec = WireCodec<JsonRpcResponse, JsonRpcRequest>;

/// Worker side: reads requests, writes responses
pub type WorkerCodec = WireCodec<JsonRpcRequest, JsonRpcResponse>;

/// Front-door server side: reads client events, writes server events
pub type ServerEventCodec = WireCodec<ClientEvent, ServerEvent>;

/// Front-door client side: writes client events, reads server events
pub type ClientEventCodec = WireCodec<ServerEvent, ClientEvent>;

impl<D: DeserializeOwned, E> Decoder for WireCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::Lines => decode_line(src, &mut self.next_index),
            Framing::Document => decode_document(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }

        match self.framing {
            // Last line may lack its terminator
            Framing::Lines => {
                let line = src.split();
                self.next_index = 0;
                Ok(parse_frame(&line))
            }
            Framing::Document => {
                warn!(
                    bytes = src.len(),
                    "Discarding incomplete document at end of stream"
                );
                src.clear();
                Ok(None)
            }
        }
    }
}

impl<D, E: Serialize> Encoder<E> for WireCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&item)?;

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        if self.framing == Framing::Lines {
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}

/// Decode the next newline-terminated document
///
/// `next_index` remembers how far a partial line was already scanned.
fn decode_line<D: DeserializeOwned>(
    src: &mut BytesMut,
    next_index: &mut usize,
) -> Result<Option<D>, CodecError> {
    loop {
        let start = (*next_index).min(src.len());
        let Some(newline) = src[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| start + offset)
        else {
            *next_index = src.len();
            if src.len() > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge {
                    size: src.len(),
                    max: MAX_MESSAGE_SIZE,
                });
            }
            return Ok(None);
        };

        *next_index = 0;
        if newline > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: newline,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let line = src.split_to(newline + 1);
        if let Some(item) = parse_frame(&line[..newline]) {
            return Ok(Some(item));
        }
    }
}

/// Decode the first complete document in the accumulation buffer
fn decode_document<D: DeserializeOwned>(src: &mut BytesMut) -> Result<Option<D>, CodecError> {
    loop {
        let (next, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&src[..]).into_iter::<serde_json::Value>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            None => {
                src.clear();
                return Ok(None);
            }
            Some(Ok(value)) => {
                src.advance(consumed);
                match serde_json::from_value::<D>(value) {
                    Ok(item) => return Ok(Some(item)),
                    Err(e) => {
                        warn!(error = %e, "Skipping document with unexpected shape");
                        continue;
                    }
                }
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > MAX_MESSAGE_SIZE {
                    return Err(CodecError::MessageTooLarge {
                        size: src.len(),
                        max: MAX_MESSAGE_SIZE,
                    });
                }
                return Ok(None);
            }
            Some(Err(e)) => {
                warn!(
                    error = %e,
                    frame = %preview(&src[..]),
                    "Discarding unparseable bytes"
                );
                src.clear();
                return Ok(None);
            }
        }
    }
}

/// Parse one frame, logging and skipping it when malformed
fn parse_frame<D: DeserializeOwned>(bytes: &[u8]) -> Option<D> {
    let trimmed = bytes.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_slice(trimmed) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(error = %e, frame = %preview(trimmed), "Skipping malformed frame");
            None
        }
    }
}

fn preview(bytes: &[u8]) -> String {
    let end = bytes.len().min(LOG_PREVIEW_BYTES);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
