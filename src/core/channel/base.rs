//! Base types for the resilient real-time channel.
//!
//! This module defines the error taxonomy, connection state machine,
//! reconnection/heartbeat configuration and the callback types shared by
//! every channel flavour (chat and voice).
//!
//! # Close codes
//!
//! | Code | Meaning                     | Reconnect by default |
//! |------|-----------------------------|----------------------|
//! | 1000 | Normal closure              | no                   |
//! | 1001 | Going away                  | yes                  |
//! | 1005 | No status received          | yes                  |
//! | 1006 | Abnormal closure / error    | yes                  |
//! | 1011 | Internal server error       | yes                  |
//! | 1012 | Service restart             | yes                  |
//! | 1013 | Try again later             | yes                  |
//! | 4000 | Ping timeout (client-side)  | yes                  |

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::messages::ChannelMessage;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closure without a status code in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Transport dropped without a close frame (socket error, refused connection).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Client-initiated closure after the heartbeat timeout fired.
pub const CLOSE_PING_TIMEOUT: u16 = 4000;

/// Reason attached to a heartbeat-triggered close.
pub const PING_TIMEOUT_REASON: &str = "Ping timeout";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on a channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Local validation failed; no connection was attempted
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Connection to the remote service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket error on an established transport
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Reconnection attempts exhausted
    #[error("Gave up after {0} reconnection attempts")]
    RetriesExhausted(u32),
}

impl ChannelError {
    /// Whether an automatic reconnect may still recover from this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChannelError::ConnectionFailed(_)
                | ChannelError::WebSocketError(_)
                | ChannelError::Timeout(_)
        )
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on connection loss.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of consecutive reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Back-off base (milliseconds).
    /// Default: 1000ms
    pub base_delay_ms: u64,

    /// Back-off cap (milliseconds).
    /// Default: 30000ms
    pub max_delay_ms: u64,

    /// Add up to ±25% jitter to each delay.
    /// Default: false
    pub jitter: bool,

    /// Close codes that trigger a reconnect when the close was not explicit.
    pub reconnectable_codes: Vec<u16>,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter: false,
            reconnectable_codes: vec![
                1001,
                CLOSE_NO_STATUS,
                CLOSE_ABNORMAL,
                1011,
                1012,
                1013,
                CLOSE_PING_TIMEOUT,
            ],
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Delay before the reconnect that follows `retry_count` consecutive
    /// failures: `min(base * 2^retry_count, cap)` milliseconds.
    pub fn calculate_delay(&self, retry_count: u32) -> u64 {
        let exp = retry_count.min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);

        if self.jitter {
            let jitter = rand_jitter(delay as f64 * 0.25);
            (delay as f64 + jitter).max(0.0) as u64
        } else {
            delay
        }
    }

    /// Check if another reconnection attempt is allowed.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || retry_count < self.max_attempts)
    }

    /// Check if a close with `code` is eligible for reconnection.
    pub fn is_reconnectable(&self, code: u16) -> bool {
        self.reconnectable_codes.contains(&code)
    }
}

/// Generate a pseudo-random jitter value in `[-range, range]` using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// Heartbeat (ping/pong liveness) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between JSON `ping` envelopes. 0 disables the heartbeat.
    /// Default: 30000ms
    pub ping_interval_ms: u64,

    /// Time without inbound traffic after a ping before the transport is
    /// force-closed. 0 disables the timeout.
    /// Default: 10000ms
    pub ping_timeout_ms: u64,

    /// Answer a server-pushed bare `#ping` text frame with a bare `#pong`.
    /// Default: true
    pub answer_bare_ping: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 30000,
            ping_timeout_ms: 10000,
            answer_bare_ping: true,
        }
    }
}

/// How `send_audio_data` frames audio on a chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFraming {
    /// Native binary WebSocket frame
    #[default]
    Binary,
    /// Legacy `{"type":"audio","content":[..bytes..]}` text frame
    JsonArray,
}

/// Channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Base WebSocket endpoint (`ws://` or `wss://`). Query parameters are
    /// appended by `connect`.
    pub base_url: Option<String>,

    /// Fixed delay between tearing down a previous transport and opening a
    /// new one on `connect` (milliseconds).
    /// Default: 100ms
    pub connect_delay_ms: u64,

    /// Upper bound on the WebSocket handshake (milliseconds).
    /// Default: 10000ms
    pub connect_timeout_ms: u64,

    /// Reconnection policy
    pub reconnection: ReconnectionConfig,

    /// Heartbeat policy
    pub heartbeat: HeartbeatConfig,

    /// Audio framing for `send_audio_data`
    pub audio_framing: AudioFraming,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_delay_ms: 100,
            connect_timeout_ms: 10000,
            reconnection: ReconnectionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            audio_framing: AudioFraming::default(),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection requested yet
    #[default]
    Idle,
    /// Opening a transport
    Connecting,
    /// Transport open and ready
    Open,
    /// Explicit close in progress
    Closing,
    /// Transport closed (may be waiting for a reconnect)
    Closed,
    /// Transport reported an error; a close follows
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    /// Human-readable description
    pub message: String,
    /// WebSocket close code, if any
    pub code: Option<u16>,
    /// Whether the caller asked for this disconnect
    pub explicit: bool,
}

impl DisconnectReason {
    /// Create a reason without a close code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            explicit: false,
        }
    }

    /// Create a reason with a close code.
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            explicit: false,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Reconnection progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionEvent {
    /// A reconnect was scheduled after `delay_ms`
    Scheduled {
        /// 1-based attempt number
        attempt: u32,
        /// Back-off delay before the attempt
        delay_ms: u64,
        /// Close code that triggered the reconnect
        close_code: u16,
    },
    /// The transport reopened
    Succeeded {
        /// Attempt number that succeeded
        attempt: u32,
    },
    /// Retries are exhausted; the channel stays closed
    GaveUp {
        /// Number of attempts made
        attempts: u32,
    },
}

/// Callback type for inbound typed messages.
pub type MessageCallback =
    Arc<dyn Fn(ChannelMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for inbound binary frames.
pub type BinaryCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for the transport opening.
pub type OpenCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for disconnect events.
pub type DisconnectCallback =
    Arc<dyn Fn(DisconnectReason) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for error events.
pub type ErrorCallback =
    Arc<dyn Fn(ChannelError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for reconnection events.
pub type ReconnectionCallback =
    Arc<dyn Fn(ReconnectionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handlers supplied when a channel is constructed. All are optional.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    pub(crate) on_message: Option<MessageCallback>,
    pub(crate) on_binary: Option<BinaryCallback>,
    pub(crate) on_open: Option<OpenCallback>,
    pub(crate) on_disconnect: Option<DisconnectCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_reconnect: Option<ReconnectionCallback>,
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for typed inbound messages (internal ping/pong excluded).
    pub fn on_message(mut self, callback: MessageCallback) -> Self {
        self.on_message = Some(callback);
        self
    }

    /// Handler for inbound binary frames.
    pub fn on_binary(mut self, callback: BinaryCallback) -> Self {
        self.on_binary = Some(callback);
        self
    }

    pub fn on_open(mut self, callback: OpenCallback) -> Self {
        self.on_open = Some(callback);
        self
    }

    pub fn on_disconnect(mut self, callback: DisconnectCallback) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn on_reconnect(mut self, callback: ReconnectionCallback) -> Self {
        self.on_reconnect = Some(callback);
        self
    }

    pub(crate) async fn emit_message(&self, message: ChannelMessage) {
        if let Some(cb) = &self.on_message {
            cb(message).await;
        }
    }

    pub(crate) async fn emit_binary(&self, data: Bytes) {
        if let Some(cb) = &self.on_binary {
            cb(data).await;
        }
    }

    pub(crate) async fn emit_open(&self) {
        if let Some(cb) = &self.on_open {
            cb().await;
        }
    }

    pub(crate) async fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason).await;
        }
    }

    pub(crate) async fn emit_error(&self, error: ChannelError) {
        if let Some(cb) = &self.on_error {
            cb(error).await;
        }
    }

    pub(crate) async fn emit_reconnect(&self, event: ReconnectionEvent) {
        if let Some(cb) = &self.on_reconnect {
            cb(event).await;
        }
    }
}

impl fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_binary", &self.on_binary.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_error_display() {
        let err = ChannelError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));
        assert!(err.is_recoverable());

        let err = ChannelError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_reconnection_config_default() {
        let config = ReconnectionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30000);
        assert!(!config.jitter);
        assert!(config.is_reconnectable(CLOSE_ABNORMAL));
        assert!(config.is_reconnectable(CLOSE_PING_TIMEOUT));
        assert!(!config.is_reconnectable(CLOSE_NORMAL));
    }

    #[test]
    fn test_reconnection_should_retry() {
        let config = ReconnectionConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));

        let disabled = ReconnectionConfig::disabled();
        assert!(!disabled.should_retry(0));

        let unlimited = ReconnectionConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(unlimited.should_retry(u32::MAX));
    }

    #[test]
    fn test_calculate_delay_doubles_until_cap() {
        let config = ReconnectionConfig {
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            ..Default::default()
        };

        assert_eq!(config.calculate_delay(0), 1000);
        assert_eq!(config.calculate_delay(1), 2000);
        assert_eq!(config.calculate_delay(2), 4000);
        assert_eq!(config.calculate_delay(3), 8000);
        assert_eq!(config.calculate_delay(4), 16000);
        assert_eq!(config.calculate_delay(5), 30000);
        assert_eq!(config.calculate_delay(60), 30000);
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = ReconnectionConfig {
            base_delay_ms: 1000,
            jitter: true,
            ..Default::default()
        };

        let delay = config.calculate_delay(0);
        assert!(
            (750..=1250).contains(&delay),
            "Delay {} should be within 750-1250",
            delay
        );
    }

    #[test]
    fn test_disconnect_reason_display() {
        let reason = DisconnectReason::with_code(PING_TIMEOUT_REASON, CLOSE_PING_TIMEOUT);
        assert_eq!(reason.to_string(), "Ping timeout (code: 4000)");
        assert_eq!(DisconnectReason::new("gone").to_string(), "gone");
    }

    #[test]
    fn test_channel_config_from_yaml_defaults() {
        let yaml = "base_url: ws://localhost:9000/ws\nheartbeat:\n  ping_interval_ms: 5000\n";
        let config: ChannelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("ws://localhost:9000/ws"));
        assert_eq!(config.heartbeat.ping_interval_ms, 5000);
        assert_eq!(config.heartbeat.ping_timeout_ms, 10000);
        assert_eq!(config.connect_delay_ms, 100);
        assert_eq!(config.audio_framing, AudioFraming::Binary);
    }
}
