//! Text codec for the realtime wire protocol.
//!
//! Events travel as JSON in WebSocket text frames. Decoding never panics on
//! arbitrary input; it returns [`CodecError`] instead.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds the permitted size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Observed size.
        size: usize,
        /// Permitted maximum.
        max: usize,
    },
}

/// Encodes an event as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an event from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a valid event.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an event after checking the frame against a size limit.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` if `text` exceeds `max` bytes, or
/// `CodecError::Serialization` if it is not a valid event.
pub fn decode_bounded<T: DeserializeOwned>(text: &str, max: usize) -> Result<T, CodecError> {
    if text.len() > max {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max,
        });
    }
    decode(text)
}
