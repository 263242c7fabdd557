//! Wire codec: zlib-compressed JSON out, compressed-or-plain JSON in.
//!
//! # Outbound
//!
//! - Batches are a JSON array of [`Envelope`]s, zlib-compressed.
//! - The immediate path sends a single JSON [`Envelope`], zlib-compressed.
//!
//! # Inbound
//!
//! The transport frame type tags the encoding. Binary frames are tried as
//! zlib first and, failing that, as plain JSON bytes (older clients send
//! uncompressed binary). Text frames are always plain JSON.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{Envelope, InboundMessage};

/// Upper bound on the size of a decompressed inbound frame.
pub const MAX_DECOMPRESSED_BYTES: u64 = 16 * 1024 * 1024;

/// Errors produced by the wire codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serializing an outbound payload failed.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The zlib encoder failed.
    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),
    /// The frame is not a valid zlib stream.
    #[error("failed to decompress frame: {0}")]
    Decompress(#[source] std::io::Error),
    /// The decompressed frame exceeded [`MAX_DECOMPRESSED_BYTES`].
    #[error("decompressed frame exceeds {MAX_DECOMPRESSED_BYTES} bytes")]
    TooLarge,
    /// Neither decode strategy produced a message.
    #[error("undecodable frame (compressed: {compressed}; plain: {plain})")]
    Undecodable {
        /// Why the compressed attempt failed.
        compressed: String,
        /// Why the plain attempt failed.
        plain: String,
    },
    /// A plain text frame was not a valid message.
    #[error("invalid message JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// A raw inbound frame as received from a client.
#[derive(Clone, Copy, Debug)]
pub enum InboundFrame<'a> {
    /// Binary frame: compressed JSON, or plain JSON bytes from older clients.
    Binary(&'a [u8]),
    /// Text frame: plain JSON.
    Text(&'a str),
}

/// zlib-compress a byte slice.
pub fn compress(data: &[u8]) -> Result<Bytes, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    let compressed = encoder.finish().map_err(CodecError::Compress)?;
    Ok(Bytes::from(compressed))
}

/// Decompress a zlib stream, refusing output above [`MAX_DECOMPRESSED_BYTES`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let _ = ZlibDecoder::new(data)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(out)
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
    compress(&json)
}

/// Encode a batch of envelopes for a duplex connection.
pub fn encode_batch(envelopes: &[Envelope]) -> Result<Bytes, CodecError> {
    encode(envelopes)
}

/// Encode a single envelope for the immediate path.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, CodecError> {
    encode(envelope)
}

/// Decode a compressed batch (client-side helper, used by tests and tools).
pub fn decode_batch(data: &[u8]) -> Result<Vec<Envelope>, CodecError> {
    let raw = decompress(data)?;
    serde_json::from_slice(&raw).map_err(CodecError::InvalidJson)
}

/// Decode a compressed single envelope (client-side helper).
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, CodecError> {
    let raw = decompress(data)?;
    serde_json::from_slice(&raw).map_err(CodecError::InvalidJson)
}

/// Decode a client frame into an [`InboundMessage`].
pub fn decode_inbound(frame: InboundFrame<'_>) -> Result<InboundMessage, CodecError> {
    match frame {
        InboundFrame::Text(text) => serde_json::from_str(text).map_err(CodecError::InvalidJson),
        InboundFrame::Binary(data) => {
            let compressed_err = match decompress(data) {
                Ok(raw) => match serde_json::from_slice(&raw) {
                    Ok(msg) => return Ok(msg),
                    Err(e) => e.to_string(),
                },
                Err(e) => e.to_string(),
            };
            serde_json::from_slice(data).map_err(|plain| CodecError::Undecodable {
                compressed: compressed_err,
                plain: plain.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn inbound_json() -> String {
        json!({"receiver": "b", "payload": {"text": "hello"}, "clientToken": "t1"}).to_string()
    }

    #[test]
    fn compressed_binary_frame_decodes() {
        let compressed = compress(inbound_json().as_bytes()).unwrap();
        let msg = decode_inbound(InboundFrame::Binary(&compressed)).unwrap();
        assert_eq!(msg.receiver.as_str(), "b");
        assert_eq!(msg.client_token.as_deref(), Some("t1"));
    }

    #[test]
    fn plain_binary_frame_decodes_via_fallback() {
        let raw = inbound_json();
        let msg = decode_inbound(InboundFrame::Binary(raw.as_bytes())).unwrap();
        assert_eq!(msg.payload["text"], "hello");
    }

    #[test]
    fn text_frame_decodes() {
        let raw = inbound_json();
        let msg = decode_inbound(InboundFrame::Text(&raw)).unwrap();
        assert_eq!(msg.receiver.as_str(), "b");
    }

    #[test]
    fn garbage_binary_frame_is_undecodable() {
        let err = decode_inbound(InboundFrame::Binary(&[0xde, 0xad, 0xbe, 0xef])).unwrap_err();
        assert_matches!(err, CodecError::Undecodable { .. });
    }

    #[test]
    fn compressed_non_message_is_undecodable() {
        let compressed = compress(b"[1,2,3]").unwrap();
        let err = decode_inbound(InboundFrame::Binary(&compressed)).unwrap_err();
        assert_matches!(err, CodecError::Undecodable { .. });
    }

    #[test]
    fn text_frame_is_never_decompressed() {
        let err = decode_inbound(InboundFrame::Text("not json")).unwrap_err();
        assert_matches!(err, CodecError::InvalidJson(_));
    }

    #[test]
    fn batch_encoding_preserves_order() {
        let batch: Vec<Envelope> = (0..3)
            .map(|i| Envelope::new("a".into(), "b".into(), json!(i)).with_id(format!("m{i}")))
            .collect();
        let encoded = encode_batch(&batch).unwrap();
        let decoded = decode_batch(&encoded).unwrap();
        let ids: Vec<&str> = decoded.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn single_envelope_encoding_is_an_object() {
        let env = Envelope::new("a".into(), "b".into(), json!({"k": 1})).with_id("m9");
        let encoded = encode_envelope(&env).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&decompress(&encoded).unwrap()).unwrap();
        assert!(raw.is_object());
        assert_eq!(raw["id"], "m9");
    }

    #[test]
    fn compression_shrinks_repetitive_payloads() {
        let data = "x".repeat(10_000);
        let compressed = compress(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len() / 10);
    }

    #[test]
    fn decompress_rejects_plain_bytes() {
        assert_matches!(decompress(b"{}"), Err(CodecError::Decompress(_)));
    }
}
