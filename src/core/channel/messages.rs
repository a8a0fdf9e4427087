//! Channel wire messages.
//!
//! Every text frame on a channel carries a `{ "type": string, "content": any }`
//! envelope. The envelope is parsed once and converted into the closed
//! [`ChannelMessage`] enum; unknown types are protocol errors and never reach
//! message handlers.
//!
//! Known types:
//! - `chat`, `text_response`, `typing`, `error`
//! - `audio` (content: numeric byte array or base64 string)
//! - `ping` / `pong` (internal heartbeat, filtered before dispatch)
//! - `call_state`, `chat_history`, `get_chat_history`
//! - `start_stream`, `stream_config`, `video`
//! - `transcript`, `init` (voice session)

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding an inbound frame segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The segment is not a JSON envelope
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    /// The envelope type is not part of the protocol
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// The envelope content does not match its type
    #[error("Invalid content for '{message_type}': {reason}")]
    InvalidContent {
        message_type: String,
        reason: String,
    },
}

/// Raw `{type, content}` envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub content: Value,
    /// Top-level transcript text used by the voice endpoint instead of `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Typed channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// User chat text sent to the character
    Chat(String),
    /// Character reply text
    TextResponse(String),
    /// Character typing indicator
    Typing(bool),
    /// Audio bytes
    Audio(Bytes),
    /// Server-reported error
    Error(String),
    /// Heartbeat ping
    Ping(Value),
    /// Heartbeat pong
    Pong(Value),
    /// Call state update
    CallState(Value),
    /// Chat history payload
    ChatHistory(Value),
    /// Request for chat history
    GetChatHistory(Value),
    /// Start a media stream
    StartStream(Value),
    /// Media stream configuration
    StreamConfig(Value),
    /// Video payload
    Video(Value),
    /// Live transcript (voice session)
    Transcript(String),
    /// Voice session initialisation
    Init(Value),
}

impl ChannelMessage {
    /// Wire type tag.
    pub fn message_type(&self) -> &'static str {
        match self {
            ChannelMessage::Chat(_) => "chat",
            ChannelMessage::TextResponse(_) => "text_response",
            ChannelMessage::Typing(_) => "typing",
            ChannelMessage::Audio(_) => "audio",
            ChannelMessage::Error(_) => "error",
            ChannelMessage::Ping(_) => "ping",
            ChannelMessage::Pong(_) => "pong",
            ChannelMessage::CallState(_) => "call_state",
            ChannelMessage::ChatHistory(_) => "chat_history",
            ChannelMessage::GetChatHistory(_) => "get_chat_history",
            ChannelMessage::StartStream(_) => "start_stream",
            ChannelMessage::StreamConfig(_) => "stream_config",
            ChannelMessage::Video(_) => "video",
            ChannelMessage::Transcript(_) => "transcript",
            ChannelMessage::Init(_) => "init",
        }
    }

    /// Heartbeat messages are handled by the channel and never dispatched.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ChannelMessage::Ping(_) | ChannelMessage::Pong(_))
    }

    /// Build the wire envelope.
    pub fn to_envelope(&self) -> Envelope {
        let content = match self {
            ChannelMessage::Chat(text)
            | ChannelMessage::TextResponse(text)
            | ChannelMessage::Error(text)
            | ChannelMessage::Transcript(text) => Value::String(text.clone()),
            ChannelMessage::Typing(typing) => Value::Bool(*typing),
            ChannelMessage::Audio(data) => {
                Value::Array(data.iter().map(|b| Value::from(*b)).collect())
            }
            ChannelMessage::Ping(v)
            | ChannelMessage::Pong(v)
            | ChannelMessage::CallState(v)
            | ChannelMessage::ChatHistory(v)
            | ChannelMessage::GetChatHistory(v)
            | ChannelMessage::StartStream(v)
            | ChannelMessage::StreamConfig(v)
            | ChannelMessage::Video(v)
            | ChannelMessage::Init(v) => v.clone(),
        };
        Envelope {
            message_type: self.message_type().to_string(),
            content,
            text: None,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_envelope())
    }

    /// Parse a single JSON envelope.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;
        Self::try_from(envelope)
    }
}

impl TryFrom<Envelope> for ChannelMessage {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope {
            message_type,
            content,
            text,
        } = envelope;

        let message = match message_type.as_str() {
            "chat" => ChannelMessage::Chat(text_content(&message_type, content)?),
            "text_response" => ChannelMessage::TextResponse(text_content(&message_type, content)?),
            "typing" => match content {
                Value::Bool(b) => ChannelMessage::Typing(b),
                Value::Null => ChannelMessage::Typing(true),
                other => {
                    return Err(invalid(&message_type, format!("expected bool, got {other}")));
                }
            },
            "audio" => ChannelMessage::Audio(audio_content(&message_type, content)?),
            "error" => ChannelMessage::Error(text_content(&message_type, content)?),
            "ping" => ChannelMessage::Ping(content),
            "pong" => ChannelMessage::Pong(content),
            "call_state" => ChannelMessage::CallState(content),
            "chat_history" => ChannelMessage::ChatHistory(content),
            "get_chat_history" => ChannelMessage::GetChatHistory(content),
            "start_stream" => ChannelMessage::StartStream(content),
            "stream_config" => ChannelMessage::StreamConfig(content),
            "video" => ChannelMessage::Video(content),
            "transcript" => match (content, text) {
                (Value::Null, Some(text)) => ChannelMessage::Transcript(text),
                (content, _) => ChannelMessage::Transcript(text_content(&message_type, content)?),
            },
            "init" => ChannelMessage::Init(content),
            _ => return Err(ProtocolError::UnknownType(message_type)),
        };
        Ok(message)
    }
}

fn invalid(message_type: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidContent {
        message_type: message_type.to_string(),
        reason: reason.into(),
    }
}

/// Accepts a bare string or an object carrying a `text` field.
fn text_content(message_type: &str, content: Value) -> Result<String, ProtocolError> {
    match content {
        Value::String(s) => Ok(s),
        Value::Object(mut map) => match map.remove("text") {
            Some(Value::String(s)) => Ok(s),
            _ => Err(invalid(message_type, "object without a string 'text' field")),
        },
        other => Err(invalid(message_type, format!("expected text, got {other}"))),
    }
}

/// Accepts a numeric byte array (legacy framing) or a base64 string.
fn audio_content(message_type: &str, content: Value) -> Result<Bytes, ProtocolError> {
    match content {
        Value::String(s) => BASE64_STANDARD
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(|e| invalid(message_type, format!("bad base64: {e}"))),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let byte = item
                    .as_u64()
                    .filter(|b| *b <= u8::MAX as u64)
                    .ok_or_else(|| invalid(message_type, "array element is not a byte"))?;
                out.push(byte as u8);
            }
            Ok(Bytes::from(out))
        }
        other => Err(invalid(message_type, format!("expected audio, got {other}"))),
    }
}
