//! Streaming envelope framing.
//!
//! Server-streaming RPCs frame every message in an envelope:
//!
//! ```text
//! [flags:1][length:4][payload:length]
//! ```
//!
//! The last frame of a stream carries [`envelope_flags::END_STREAM`] and a JSON
//! payload holding the terminal error (if any) and trailer metadata.

use std::collections::BTreeMap;

use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::Status;
use crate::metadata::{headers_from_map, headers_to_map};

/// Envelope flags.
pub mod envelope_flags {
    /// Regular message.
    pub const MESSAGE: u8 = 0x00;
    /// Compressed message. Compression is never negotiated, so receiving it is an error.
    pub const COMPRESSED: u8 = 0x01;
    /// End of stream.
    pub const END_STREAM: u8 = 0x02;
}

/// Envelope header size (flags + length).
pub const ENVELOPE_HEADER_SIZE: usize = 5;

/// Envelope framing errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("incomplete envelope header: expected {expected} bytes, got {actual}")]
    IncompleteHeader { expected: usize, actual: usize },

    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),

    #[error("stream ended with {0} bytes of incomplete data")]
    Truncated(usize),

    #[error("invalid end-stream payload: {0}")]
    EndStream(String),
}

/// Wrap a payload in a message envelope.
pub fn wrap_envelope(payload: &[u8]) -> Vec<u8> {
    frame(envelope_flags::MESSAGE, payload)
}

fn frame(flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    frame.push(flags);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Parse an envelope header, returning `(flags, length)`.
pub fn parse_envelope_header(data: &[u8]) -> Result<(u8, u32), EnvelopeError> {
    if data.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::IncompleteHeader {
            expected: ENVELOPE_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let flags = data[0];
    let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((flags, length))
}

/// A decoded frame.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Message(Bytes),
    EndStream(EndStream),
}

/// Terminal frame contents.
#[derive(Debug, Default, PartialEq)]
pub struct EndStream {
    pub error: Option<Status>,
    pub trailers: HeaderMap,
}

#[derive(Serialize, Deserialize, Default)]
struct EndStreamJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<Status>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, Vec<String>>,
}

/// Build the terminal frame of a stream.
pub fn end_stream_frame(error: Option<&Status>, trailers: &HeaderMap) -> Vec<u8> {
    let json = EndStreamJson {
        error: error.cloned(),
        metadata: headers_to_map(trailers),
    };
    let payload = serde_json::to_vec(&json).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize end-stream frame");
        br#"{"error":{"code":"internal","message":"internal serialization error"}}"#.to_vec()
    });
    frame(envelope_flags::END_STREAM, &payload)
}

fn parse_end_stream(payload: &[u8]) -> Result<EndStream, EnvelopeError> {
    if payload.is_empty() {
        return Ok(EndStream::default());
    }
    let json: EndStreamJson =
        serde_json::from_slice(payload).map_err(|e| EnvelopeError::EndStream(e.to_string()))?;
    Ok(EndStream {
        error: json.error,
        trailers: headers_from_map(&json.metadata),
    })
}

/// Incremental frame decoder.
///
/// Bytes are pushed as they arrive; [`EnvelopeReader::next_frame`] yields a
/// frame once it is complete.
#[derive(Debug, Default)]
pub struct EnvelopeReader {
    buffer: BytesMut,
}

impl EnvelopeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, EnvelopeError> {
        if self.buffer.len() < ENVELOPE_HEADER_SIZE {
            return Ok(None);
        }
        let (flags, length) = parse_envelope_header(&self.buffer)?;
        let frame_size = ENVELOPE_HEADER_SIZE + length as usize;
        if self.buffer.len() < frame_size {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(frame_size);
        frame.advance(ENVELOPE_HEADER_SIZE);
        let payload = frame.freeze();

        match flags {
            envelope_flags::MESSAGE => Ok(Some(Frame::Message(payload))),
            envelope_flags::END_STREAM => parse_end_stream(&payload).map(|e| Some(Frame::EndStream(e))),
            other => Err(EnvelopeError::InvalidFlags(other)),
        }
    }

    /// Called when the underlying body is exhausted.
    pub fn finish(&self) -> Result<(), EnvelopeError> {
        match self.buffer.len() {
            0 => Ok(()),
            n => Err(EnvelopeError::Truncated(n)),
        }
    }
}
