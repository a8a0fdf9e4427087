//! Resilient real-time channel.
//!
//! One [`ChannelClient`] owns one logical connection to a fixed endpoint:
//! connection lifecycle, heartbeat liveness, reconnection with exponential
//! back-off and typed message dispatch.
//!
//! # Architecture
//!
//! - `base`: configuration, errors, connection state and callbacks
//! - `messages`: the closed [`ChannelMessage`] wire enum
//! - `dispatch`: newline splitting and classification of inbound frames
//! - `heartbeat`: ping schedule and traffic deadline
//! - `client`: the client handle and its connection task

mod base;
mod client;
pub mod dispatch;
pub mod heartbeat;
pub mod messages;

pub use base::{
    AudioFraming, BinaryCallback, CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL,
    CLOSE_PING_TIMEOUT, ChannelConfig, ChannelError, ChannelHandlers, ChannelResult,
    ConnectionState, DisconnectCallback, DisconnectReason, ErrorCallback, HeartbeatConfig,
    MessageCallback, OpenCallback, PING_TIMEOUT_REASON, ReconnectionCallback, ReconnectionConfig,
    ReconnectionEvent,
};
pub use client::ChannelClient;
pub use dispatch::{BARE_PING, BARE_PONG, FrameItem, classify_text_frame};
pub use messages::{ChannelMessage, Envelope, ProtocolError};
