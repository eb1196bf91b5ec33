//! Encoding/decoding of [`Message`] to the JSON string wire format.

use crate::message::Message;
use thiserror::Error;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message to its wire string.
///
/// Infallible in practice (our `Message` always serializes), but returns a
/// `Result` to keep the boundary honest if a future variant grows a type
/// that can't serialize.
pub fn encode(msg: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a wire string into a [`Message`].
///
/// Malformed or unparseable messages are a `ProtocolViolation`: the caller
/// logs and discards them, they never tear the manager down. An unknown
/// `type` discriminator decodes here as
/// `Err(CodecError::Malformed)` too, since serde's internally-tagged enum
/// rejects unrecognized tags the same way it rejects missing fields.
pub fn decode(raw: &str) -> Result<Message, CodecError> {
    Ok(serde_json::from_str(raw)?)
}
