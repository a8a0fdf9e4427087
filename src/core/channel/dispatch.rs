//! Inbound text frame splitting and classification.
//!
//! A server may coalesce several JSON envelopes into one frame separated by
//! newlines. Each segment is classified independently so that one bad
//! segment never affects its neighbours.

use super::messages::{ChannelMessage, ProtocolError};

/// Bare liveness check pushed by the server outside the JSON protocol.
pub const BARE_PING: &str = "#ping";
/// Bare reply to [`BARE_PING`].
pub const BARE_PONG: &str = "#pong";

/// One classified segment of an inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameItem {
    /// Server sent a bare `#ping`
    BarePing,
    /// Bare `#pong`, or a JSON `ping`/`pong` envelope
    Heartbeat,
    /// A message for the caller's handler
    Message(ChannelMessage),
    /// Segment failed to decode and is dropped
    Dropped(ProtocolError),
}

/// Split and classify an inbound text frame, preserving segment order.
pub fn classify_text_frame(text: &str) -> Vec<FrameItem> {
    text.split('\n')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(classify_segment)
        .collect()
}

fn classify_segment(segment: &str) -> FrameItem {
    match segment {
        BARE_PING => FrameItem::BarePing,
        BARE_PONG => FrameItem::Heartbeat,
        _ => match ChannelMessage::from_json(segment) {
            Ok(msg) if msg.is_heartbeat() => FrameItem::Heartbeat,
            Ok(msg) => FrameItem::Message(msg),
            Err(e) => FrameItem::Dropped(e),
        },
    }
}
