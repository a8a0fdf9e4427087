//! Reconnecting WebSocket channel client.
//!
//! `ChannelClient` owns one logical connection to a fixed endpoint. A spawned
//! connection task holds the only live transport, drives the heartbeat and
//! re-establishes the transport with exponential back-off when it drops.
//!
//! # Example
//!
//! ```rust,ignore
//! use character_channel::core::channel::{ChannelClient, ChannelConfig, ChannelHandlers, ChannelMessage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ChannelConfig {
//!         base_url: Some("wss://chat.example.com/ws".to_string()),
//!         ..Default::default()
//!     };
//!     let handlers = ChannelHandlers::new().on_message(Arc::new(|msg| Box::pin(async move {
//!         println!("{} <- {:?}", msg.message_type(), msg);
//!     })));
//!
//!     let client = ChannelClient::new(config, handlers);
//!     client.connect("42", "client-abc", None).await.unwrap();
//!     client.send_message(ChannelMessage::Chat("Hello!".to_string()));
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::base::{
    AudioFraming, CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, CLOSE_PING_TIMEOUT,
    ChannelConfig, ChannelError, ChannelHandlers, ChannelResult, ConnectionState,
    DisconnectReason, PING_TIMEOUT_REASON, ReconnectionEvent,
};
use super::dispatch::{BARE_PONG, FrameItem, classify_text_frame};
use super::heartbeat::Heartbeat;
use super::messages::ChannelMessage;
use crate::utils::url_validation::validate_ws_url;

/// Channel capacity for outbound frames of one transport.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long teardown waits for the connection task before aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames queued for the current transport.
#[derive(Debug)]
enum Outbound {
    Text(String),
    Binary(Bytes),
}

impl Outbound {
    fn into_message(self) -> Message {
        match self {
            Outbound::Text(text) => Message::Text(text.into()),
            Outbound::Binary(data) => Message::Binary(data),
        }
    }
}

/// State shared between the client handle and its connection task.
#[derive(Debug, Default)]
struct Shared {
    state: RwLock<ConnectionState>,
    retry_count: AtomicU32,
    explicit_close: AtomicBool,
    endpoint: RwLock<Option<String>>,
    /// Sender for the live transport; `None` whenever no transport is open.
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            tracing::debug!("Channel state {} -> {}", *state, next);
            *state = next;
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

struct ConnectionTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Where a connection task connects and what it sends first.
#[derive(Debug, Clone)]
struct Target {
    url: Url,
    hello: Option<ChannelMessage>,
}

/// How a transport ended.
#[derive(Debug)]
struct CloseOutcome {
    code: u16,
    reason: String,
    explicit: bool,
}

impl CloseOutcome {
    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            explicit: false,
        }
    }

    fn explicit() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: "Client disconnect".to_string(),
            explicit: true,
        }
    }

    fn into_reason(self) -> DisconnectReason {
        DisconnectReason {
            message: self.reason,
            code: Some(self.code),
            explicit: self.explicit,
        }
    }
}

// =============================================================================
// Channel Client
// =============================================================================

/// Resilient real-time channel.
///
/// # Invariants
///
/// - At most one live transport exists per client; `connect` tears down the
///   previous connection task before spawning a new one.
/// - Outbound frames are only accepted while the state is `Open`; nothing is
///   queued across reconnects.
/// - After `disconnect` no reconnect can happen: every timer lives inside the
///   connection task and is dropped with it.
pub struct ChannelClient {
    config: ChannelConfig,
    handlers: ChannelHandlers,
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<ConnectionTask>>,
}

impl ChannelClient {
    pub fn new(config: ChannelConfig, handlers: ChannelHandlers) -> Self {
        Self {
            config,
            handlers,
            shared: Arc::new(Shared::default()),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Build `<base>?characterId=..&clientId=..[&sessionId=..]`.
    pub fn build_endpoint(
        base_url: Option<&str>,
        target: &str,
        client_id: &str,
        session_id: Option<&str>,
    ) -> ChannelResult<Url> {
        let base = base_url
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                ChannelError::InvalidConfiguration("channel base URL is not configured".to_string())
            })?;
        if target.trim().is_empty() {
            return Err(ChannelError::InvalidConfiguration(
                "target id is required".to_string(),
            ));
        }
        if client_id.trim().is_empty() {
            return Err(ChannelError::InvalidConfiguration(
                "client id is required".to_string(),
            ));
        }

        let mut url =
            validate_ws_url(base).map_err(|e| ChannelError::InvalidConfiguration(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("characterId", target);
            query.append_pair("clientId", client_id);
            if let Some(session) = session_id.filter(|s| !s.is_empty()) {
                query.append_pair("sessionId", session);
            }
        }
        Ok(url)
    }

    /// Connect to the configured endpoint for `target`.
    ///
    /// Validation failures never attempt a connection: the disconnect handler
    /// is invoked and the error returned.
    pub async fn connect(
        &self,
        target: &str,
        client_id: &str,
        session_id: Option<&str>,
    ) -> ChannelResult<()> {
        let url = match Self::build_endpoint(
            self.config.base_url.as_deref(),
            target,
            client_id,
            session_id,
        ) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Channel connect rejected: {}", e);
                self.handlers
                    .emit_disconnect(DisconnectReason::new(e.to_string()))
                    .await;
                return Err(e);
            }
        };
        self.connect_url(url, None).await
    }

    /// Connect to an explicit endpoint, optionally sending `hello` as the
    /// first frame on every (re)opened transport.
    ///
    /// The task slot stays locked from teardown until the new task is
    /// stored, so overlapping calls never leave two transports alive.
    pub async fn connect_url(&self, url: Url, hello: Option<ChannelMessage>) -> ChannelResult<()> {
        let mut slot = self.task.lock().await;
        teardown(&self.shared, &mut slot).await;

        self.shared.explicit_close.store(false, Ordering::SeqCst);
        self.shared.retry_count.store(0, Ordering::SeqCst);
        *self.shared.endpoint.write() = Some(url.to_string());
        self.shared.set_state(ConnectionState::Connecting);

        tracing::info!("Connecting channel to {}", url);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_connection(
            Target { url, hello },
            self.config.clone(),
            self.handlers.clone(),
            self.shared.clone(),
            cancel.clone(),
        ));
        *slot = Some(ConnectionTask { handle, cancel });
        Ok(())
    }

    /// Close the channel and suppress any further reconnect.
    pub async fn disconnect(&self) {
        let mut slot = self.task.lock().await;
        self.shared.explicit_close.store(true, Ordering::SeqCst);
        teardown(&self.shared, &mut slot).await;
        self.shared.set_state(ConnectionState::Closed);
        tracing::info!("Channel disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> Option<String> {
        self.shared.endpoint.read().clone()
    }

    /// Send a typed message. Returns `false` (and writes nothing) unless the
    /// channel is open.
    pub fn send_message(&self, message: ChannelMessage) -> bool {
        if !self.is_connected() {
            tracing::debug!(
                "Dropping '{}' message: channel is {}",
                message.message_type(),
                self.state()
            );
            return false;
        }
        match message.to_json() {
            Ok(json) => self.enqueue(Outbound::Text(json)),
            Err(e) => {
                tracing::error!("Failed to serialize '{}': {}", message.message_type(), e);
                false
            }
        }
    }

    /// Send a chat line to the character.
    pub fn send_chat(&self, text: impl Into<String>) -> bool {
        self.send_message(ChannelMessage::Chat(text.into()))
    }

    pub fn request_chat_history(&self) -> bool {
        self.send_message(ChannelMessage::GetChatHistory(serde_json::Value::Null))
    }

    /// Send audio using the configured framing.
    pub fn send_audio_data(&self, data: impl Into<Bytes>) -> bool {
        let data = data.into();
        match self.config.audio_framing {
            AudioFraming::Binary => self.send_binary(data),
            AudioFraming::JsonArray => self.send_message(ChannelMessage::Audio(data)),
        }
    }

    /// Send a raw binary frame. Returns `false` unless the channel is open.
    pub fn send_binary(&self, data: Bytes) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.enqueue(Outbound::Binary(data))
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        let guard = self.shared.outbound.lock();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Outbound frame dropped: {}", e);
                false
            }
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// Stop the task in `slot`, if any, and wait for it to exit.
async fn teardown(shared: &Shared, slot: &mut Option<ConnectionTask>) {
    let Some(task) = slot.take() else {
        return;
    };
    task.cancel.cancel();
    let abort = task.handle.abort_handle();
    if tokio::time::timeout(TEARDOWN_TIMEOUT, task.handle)
        .await
        .is_err()
    {
        tracing::warn!("Connection task did not stop in time, aborting");
        abort.abort();
    }
    *shared.outbound.lock() = None;
}


async fn run_connection(
    target: Target,
    config: ChannelConfig,
    handlers: ChannelHandlers,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(Duration::from_millis(config.connect_delay_ms)) => {}
    }

    let reconnection = &config.reconnection;
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);

        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closed);
                return;
            }
            result = open_transport(target.url.as_str(), config.connect_timeout_ms) => result,
        };

        let outcome = match opened {
            Ok(ws) => {
                shared.retry_count.store(0, Ordering::SeqCst);
                if attempt > 0 {
                    tracing::info!("Channel reconnected on attempt {}", attempt);
                    handlers
                        .emit_reconnect(ReconnectionEvent::Succeeded { attempt })
                        .await;
                }
                attempt = 0;
                run_transport(ws, &target, &config, &handlers, &shared, &cancel).await
            }
            Err(e) => {
                tracing::error!("Channel connection failed: {}", e);
                shared.set_state(ConnectionState::Error);
                handlers.emit_error(e.clone()).await;
                CloseOutcome::abnormal(e.to_string())
            }
        };

        *shared.outbound.lock() = None;
        shared.set_state(ConnectionState::Closed);

        let code = outcome.code;
        let explicit = outcome.explicit || shared.explicit_close.load(Ordering::SeqCst);
        tracing::info!("Channel closed: {} (code {})", outcome.reason, code);
        handlers.emit_disconnect(outcome.into_reason()).await;

        if explicit || cancel.is_cancelled() {
            return;
        }
        if !reconnection.enabled || !reconnection.is_reconnectable(code) {
            tracing::info!("Close code {} is not reconnectable", code);
            return;
        }

        let retry = shared.retry_count.load(Ordering::SeqCst);
        if !reconnection.should_retry(retry) {
            tracing::warn!(
                "Reconnection max attempts ({}) reached, staying closed",
                reconnection.max_attempts
            );
            handlers
                .emit_reconnect(ReconnectionEvent::GaveUp { attempts: retry })
                .await;
            handlers
                .emit_error(ChannelError::RetriesExhausted(retry))
                .await;
            return;
        }

        let delay_ms = reconnection.calculate_delay(retry);
        attempt = retry + 1;
        shared.retry_count.store(attempt, Ordering::SeqCst);
        tracing::info!(
            "Attempting reconnection {}/{} in {}ms",
            attempt,
            if reconnection.max_attempts == 0 {
                "∞".to_string()
            } else {
                reconnection.max_attempts.to_string()
            },
            delay_ms
        );
        handlers
            .emit_reconnect(ReconnectionEvent::Scheduled {
                attempt,
                delay_ms,
                close_code: code,
            })
            .await;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Disconnect requested during reconnection delay");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}

async fn open_transport(url: &str, timeout_ms: u64) -> Result<WsStream, ChannelError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ChannelError::InvalidConfiguration(e.to_string()))?;
    request.headers_mut().insert(
        http::header::USER_AGENT,
        http::HeaderValue::from_static(concat!("character-channel/", env!("CARGO_PKG_VERSION"))),
    );

    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        tokio_tungstenite::connect_async(request),
    )
    .await
    {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(ChannelError::ConnectionFailed(e.to_string())),
        Err(_) => Err(ChannelError::Timeout(format!(
            "handshake exceeded {timeout_ms}ms"
        ))),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Drive one open transport until it closes.
async fn run_transport(
    ws: WsStream,
    target: &Target,
    config: &ChannelConfig,
    handlers: &ChannelHandlers,
    shared: &Shared,
    cancel: &CancellationToken,
) -> CloseOutcome {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(WS_CHANNEL_CAPACITY);
    *shared.outbound.lock() = Some(tx);
    shared.set_state(ConnectionState::Open);
    tracing::info!("Channel open");

    if let Some(hello) = &target.hello {
        match hello.to_json() {
            Ok(json) => {
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    shared.set_state(ConnectionState::Error);
                    handlers
                        .emit_error(ChannelError::WebSocketError(e.to_string()))
                        .await;
                    return CloseOutcome::abnormal(format!("Failed to send init: {e}"));
                }
            }
            Err(e) => tracing::error!("Failed to serialize init message: {}", e),
        }
    }

    handlers.emit_open().await;

    let mut heartbeat = Heartbeat::new(&config.heartbeat, Instant::now());

    loop {
        let ping_at = heartbeat.next_ping_at();
        let deadline = heartbeat.deadline_or_far(Instant::now());

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closing);
                while let Ok(pending) = rx.try_recv() {
                    if sink.send(pending.into_message()).await.is_err() {
                        break;
                    }
                }
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "Client disconnect".into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!("Close frame not delivered: {}", e);
                }
                return CloseOutcome::explicit();
            }

            _ = tokio::time::sleep_until(deadline), if heartbeat.deadline().is_some() => {
                tracing::warn!(
                    "No traffic within {}ms of ping, closing transport",
                    config.heartbeat.ping_timeout_ms
                );
                let frame = CloseFrame {
                    code: CloseCode::from(CLOSE_PING_TIMEOUT),
                    reason: PING_TIMEOUT_REASON.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!("Close frame not delivered: {}", e);
                }
                return CloseOutcome {
                    code: CLOSE_PING_TIMEOUT,
                    reason: PING_TIMEOUT_REASON.to_string(),
                    explicit: false,
                };
            }

            Some(frame) = rx.recv() => {
                if let Err(e) = sink.send(frame.into_message()).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    shared.set_state(ConnectionState::Error);
                    handlers.emit_error(ChannelError::WebSocketError(e.to_string())).await;
                    return CloseOutcome::abnormal(e.to_string());
                }
            }

            _ = tokio::time::sleep_until(ping_at), if heartbeat.is_enabled() => {
                let ping = ChannelMessage::Ping(json!(now_millis()));
                let sent = match ping.to_json() {
                    Ok(json) => sink.send(Message::Text(json.into())).await,
                    Err(e) => {
                        tracing::error!("Failed to serialize ping: {}", e);
                        Ok(())
                    }
                };
                if let Err(e) = sent {
                    tracing::warn!("Heartbeat ping failed: {}", e);
                    shared.set_state(ConnectionState::Error);
                    return CloseOutcome::abnormal(format!("Heartbeat ping failed: {e}"));
                }
                tracing::trace!("Heartbeat ping sent");
                heartbeat.ping_sent(Instant::now());
            }

            frame = stream.next() => {
                heartbeat.traffic_received();

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        for item in classify_text_frame(text.as_str()) {
                            match item {
                                FrameItem::BarePing => {
                                    if !config.heartbeat.answer_bare_ping {
                                        continue;
                                    }
                                    if let Err(e) = sink.send(Message::Text(BARE_PONG.into())).await {
                                        tracing::error!("Failed to answer bare ping: {}", e);
                                    }
                                }
                                FrameItem::Heartbeat => tracing::trace!("Heartbeat received"),
                                FrameItem::Message(message) => handlers.emit_message(message).await,
                                FrameItem::Dropped(e) => {
                                    tracing::warn!("Dropping inbound segment: {}", e);
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => handlers.emit_binary(data).await,
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            tracing::error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.to_string()),
                            None => (CLOSE_NO_STATUS, "Server closed connection".to_string()),
                        };
                        return CloseOutcome { code, reason, explicit: false };
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        shared.set_state(ConnectionState::Error);
                        handlers.emit_error(ChannelError::WebSocketError(e.to_string())).await;
                        return CloseOutcome::abnormal(format!("WebSocket error: {e}"));
                    }
                    None => return CloseOutcome::abnormal("WebSocket stream ended"),
                }
            }
        }
    }
}
