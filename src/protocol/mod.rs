//! UDP protocol message definitions
//! Every datagram is one UTF-8 JSON object. Control messages carry a `type`
//! field; agent commands are plain `{left, right, jump, attack}` objects.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::world::{Command, WorldSnapshot};

/// Largest payload the bridge will put on the wire
pub const MAX_DATAGRAM: usize = 32 * 1024;

/// Messages sent by the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMsg {
    /// Readiness check sent until the consumer answers
    Ping,

    /// Streamed world state
    FullUpdate { state: WorldSnapshot },

    /// Acknowledges a reset request
    ResetDone,

    /// Answer to a get_state request
    State(StateReply),

    /// Request could not be answered
    Error {
        message: String,
        /// Payload size that triggered the error, when relevant
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
}

/// Body of a `state` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateReply {
    Snapshot(WorldSnapshot),
    Failed { error: String },
}

/// Control messages sent by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMsg {
    Pong,
    Ready,
    Reset,
    GetState,
}

/// Control message kinds the bridge understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Ping,
    Pong,
    Ready,
    Reset,
    GetState,
    Unknown(String),
}

impl Control {
    /// Type names are matched case-insensitively
    pub fn from_type(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "ready" => Self::Ready,
            "reset" => Self::Reset,
            "get_state" => Self::GetState,
            _ => Self::Unknown(kind.to_string()),
        }
    }

    /// Whether this unblocks streaming during the handshake
    pub fn is_ready_signal(&self) -> bool {
        matches!(self, Self::Pong | Self::Ready)
    }
}

/// A decoded datagram addressed to the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(Control),
    Command(Command),
}

/// Decode a datagram sent to the bridge
pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, ProtocolError> {
    let text = std::str::from_utf8(payload)?;
    let value: serde_json::Value = serde_json::from_str(text)?;
    let fields = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    if let Some(kind) = fields.get("type") {
        let kind = kind.as_str().ok_or(ProtocolError::InvalidField("type"))?;
        return Ok(Inbound::Control(Control::from_type(kind)));
    }

    Ok(Inbound::Command(serde_json::from_value(value)?))
}

/// Decode a datagram sent by the bridge
pub fn decode_bridge_msg(payload: &[u8]) -> Result<BridgeMsg, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize any message without a size check
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(msg)?))
}

/// Serialize a message, refusing payloads above [`MAX_DATAGRAM`]
pub fn encode_bounded<T: Serialize>(msg: &T) -> Result<Bytes, ProtocolError> {
    let bytes = encode(msg)?;
    check_size(bytes.len())?;
    Ok(bytes)
}

pub fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_DATAGRAM {
        return Err(ProtocolError::TooLarge {
            size,
            limit: MAX_DATAGRAM,
        });
    }
    Ok(())
}

/// Serialize a reply. Oversized or unencodable replies become an explicit
/// error message instead of being truncated.
pub fn encode_reply(msg: &BridgeMsg) -> Bytes {
    let fallback = match encode_bounded(msg) {
        Ok(bytes) => return bytes,
        Err(ProtocolError::TooLarge { size, .. }) => BridgeMsg::Error {
            message: "Response too large for UDP transmission".to_string(),
            size: Some(size),
        },
        Err(e) => BridgeMsg::Error {
            message: e.to_string(),
            size: None,
        },
    };

    encode(&fallback)
        .unwrap_or_else(|_| Bytes::from_static(br#"{"type":"error","message":"encoding failed"}"#))
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Field has the wrong type: {0}")]
    InvalidField(&'static str),

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}
