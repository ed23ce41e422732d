//! Length-prefixed frame encoding.
//!
//! ```text
//! [4 bytes LE i32: payload length, 1..=65535]
//! [length bytes: JSON WireMessage]
//! ```
//!
//! Decoding from a stream lives with the connection's receive loop; this
//! module only provides the pure pieces it is built from.

use crate::constants::{HEADER_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION};
use crate::message::WireMessage;

/// Errors from encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame length: {0}")]
    InvalidLength(i32),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

/// Serializes a message into its payload bytes.
///
/// Fails instead of truncating when the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode_payload(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(payload)
}

/// Serializes a message into a complete frame, header included.
pub fn encode_frame(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let payload = encode_payload(msg)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&encode_header(payload.len())?);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Encodes a payload length as a frame header.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_SIZE], CodecError> {
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok((len as i32).to_le_bytes())
}

/// Validates a frame header and returns the payload length it declares.
pub fn parse_header(header: [u8; HEADER_SIZE]) -> Result<usize, CodecError> {
    let len = i32::from_le_bytes(header);
    if len <= 0 {
        return Err(CodecError::InvalidLength(len));
    }
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

/// Deserializes a complete payload, refusing unknown protocol versions.
pub fn decode_payload(payload: &[u8]) -> Result<WireMessage, CodecError> {
    let msg: WireMessage = serde_json::from_slice(payload)?;
    if msg.version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(msg.version));
    }
    Ok(msg)
}
