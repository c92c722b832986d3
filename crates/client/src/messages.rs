//! Progress socket frame types and parsers.
//!
//! Two layers of decoding happen on each text frame:
//!
//! 1. [`classify_frame`] separates heartbeat control frames (top-level
//!    `"event"` field) from payloads. Control frames never leave the
//!    connection layer.
//! 2. [`parse_server_message`] turns a forwarded payload into a typed
//!    [`ServerMessage`] for the progress store.

use serde_json::Value;
use stagewatch_core::frames::{
    EVENT_CONNECTED, EVENT_PING, EVENT_PONG, MSG_TYPE_LOG, MSG_TYPE_PROGRESS,
};
use stagewatch_core::log::LogPayload;
use stagewatch_core::progress::ProgressUpdate;

// ---------------------------------------------------------------------------
// Control layer
// ---------------------------------------------------------------------------

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Server heartbeat; answer with [`pong_frame`].
    Ping,
    /// Connection acknowledgement with its `data` object (or `null`).
    Connected(Value),
    /// Anything else. Forwarded to the channel handler.
    Payload(Value),
}

/// Why a text frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,
}

/// Decode a text frame and classify it by its `event` discriminator.
///
/// Objects with an unrecognized `event` value are payloads, not errors.
pub fn classify_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let mut value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(FrameError::NotAnObject);
    }

    let event = value.get("event").and_then(Value::as_str).map(str::to_owned);
    let frame = match event.as_deref() {
        Some(EVENT_PING) => InboundFrame::Ping,
        Some(EVENT_CONNECTED) => {
            InboundFrame::Connected(value.get_mut("data").map(Value::take).unwrap_or_default())
        }
        _ => InboundFrame::Payload(value),
    };
    Ok(frame)
}

/// The heartbeat reply, `{"event":"pong"}`.
pub fn pong_frame() -> String {
    serde_json::json!({ "event": EVENT_PONG }).to_string()
}

// ---------------------------------------------------------------------------
// Payload layer
// ---------------------------------------------------------------------------

/// A payload routed to the progress store.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Progress(ProgressUpdate),
    Log(LogPayload),
    /// A payload `type` this client does not handle.
    Other(String),
}

/// Decode a forwarded payload.
///
/// Progress payloads may arrive as `{"type":"progress","data":{...}}`,
/// as `{"data":{...}}`, or as a bare update object.
pub fn parse_server_message(value: Value) -> Result<ServerMessage, serde_json::Error> {
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        None | Some(MSG_TYPE_PROGRESS) => {
            Ok(ServerMessage::Progress(serde_json::from_value(take_data(value))?))
        }
        Some(MSG_TYPE_LOG) => Ok(ServerMessage::Log(serde_json::from_value(take_data(value))?)),
        Some(other) => Ok(ServerMessage::Other(other.to_string())),
    }
}

/// The `data` object of an envelope, or the envelope itself when it has
/// no `data` object.
fn take_data(mut value: Value) -> Value {
    let has_data = value.get("data").is_some_and(Value::is_object);
    if has_data {
        value.get_mut("data").map(Value::take).unwrap_or_default()
    } else {
        value
    }
}
