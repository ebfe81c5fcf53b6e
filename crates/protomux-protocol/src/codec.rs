//! Text codec for wire frames.
//!
//! The transport carries one JSON document per frame. Framing on the byte
//! stream is the transport's business; this module only turns envelopes
//! into text and text back into JSON values, enforcing the size limit in
//! both directions.

use serde::Serialize;
use serde_json::Value;

use crate::MAX_MESSAGE_SIZE;
use crate::error::{CodecError, CodecResult};

/// Encodes a message into the text form handed to the transport.
///
/// # Example
///
/// ```rust
/// use protomux_protocol::{encode_frame, RequestEnvelope};
///
/// let request = RequestEnvelope::new(1, "Browser.getVersion", None);
/// let text = encode_frame(&request).unwrap();
/// assert_eq!(text, r#"{"id":1,"method":"Browser.getVersion"}"#);
/// ```
pub fn encode_frame<T: Serialize>(message: &T) -> CodecResult<String> {
    let text = serde_json::to_string(message)?;

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(text)
}

/// Decodes a frame received from the transport.
///
/// The result is kept as a raw [`Value`] so proxy traffic can be forwarded
/// verbatim; see [`Inbound::classify`](crate::Inbound::classify).
///
/// # Example
///
/// ```rust
/// use protomux_protocol::decode_frame;
///
/// let value = decode_frame(r#"{"id":3,"result":{"ok":true}}"#).unwrap();
/// assert_eq!(value["id"], 3);
/// ```
pub fn decode_frame(text: &str) -> CodecResult<Value> {
    if text.trim().is_empty() {
        return Err(CodecError::EmptyFrame);
    }

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject(text.chars().take(64).collect()));
    }
    Ok(value)
}
