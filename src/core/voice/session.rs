//! `VoiceSession`: a [`ChannelClient`] bound to the voice endpoint that
//! reframes captured PCM and routes inbound transcripts and audio.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;

use crate::core::audio::pcm::{PcmFramer, VOICE_SAMPLE_RATE};
use crate::core::audio::stt::TranscriptCallback;
use crate::core::channel::{
    BinaryCallback, ChannelClient, ChannelConfig, ChannelHandlers, ChannelMessage, ChannelResult,
    ConnectionState, DisconnectCallback, ErrorCallback, MessageCallback,
};
use crate::utils::url_validation::{UrlValidationError, validate_ws_url};

/// Path of the voice endpoint relative to the chat host.
pub const VOICE_SESSION_PATH: &str = "/ai-layer/ws/voice-session";

/// Derive the voice endpoint from the chat WebSocket URL (same origin).
pub fn voice_url_from_chat_url(chat_url: &str) -> Result<Url, UrlValidationError> {
    let mut url = validate_ws_url(chat_url)?;
    url.set_path(VOICE_SESSION_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Character metadata carried by the `init` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Any further attributes the backend understands
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl CharacterProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceSessionConfig {
    pub url: Url,
    pub client_id: String,
    pub character: CharacterProfile,
    pub sample_rate: u32,
    pub channel: ChannelConfig,
}

impl VoiceSessionConfig {
    pub fn new(url: Url, client_id: impl Into<String>, character: CharacterProfile) -> Self {
        Self {
            url,
            client_id: client_id.into(),
            character,
            sample_rate: VOICE_SAMPLE_RATE,
            channel: ChannelConfig::default(),
        }
    }

    /// The `init` message sent on every open.
    pub fn init_message(&self) -> ChannelMessage {
        ChannelMessage::Init(json!({
            "client_id": self.client_id,
            "character_id": self.character.id,
            "character": self.character,
            "audio": {
                "encoding": "pcm_s16le",
                "sample_rate": self.sample_rate,
                "channels": 1,
            },
        }))
    }
}

/// Callbacks for a voice session.
#[derive(Clone, Default)]
pub struct VoiceHandlers {
    pub on_transcript: Option<TranscriptCallback>,
    pub on_audio: Option<BinaryCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl VoiceHandlers {
    fn into_channel_handlers(self) -> ChannelHandlers {
        let VoiceHandlers {
            on_transcript,
            on_audio,
            on_message,
            on_disconnect,
            on_error,
        } = self;

        let mut handlers = ChannelHandlers::new().on_message(Arc::new(move |message| {
            let on_transcript = on_transcript.clone();
            let on_message = on_message.clone();
            Box::pin(async move {
                match message {
                    ChannelMessage::Transcript(text) => {
                        if let Some(cb) = on_transcript {
                            cb(text).await;
                        }
                    }
                    other => {
                        if let Some(cb) = on_message {
                            cb(other).await;
                        }
                    }
                }
            })
        }));
        if let Some(cb) = on_audio {
            handlers = handlers.on_binary(cb);
        }
        if let Some(cb) = on_disconnect {
            handlers = handlers.on_disconnect(cb);
        }
        if let Some(cb) = on_error {
            handlers = handlers.on_error(cb);
        }
        handlers
    }
}

#[derive(Debug, Default)]
struct FrameState {
    framer: PcmFramer,
    /// Odd byte left over from the previous PCM push
    carry: Option<u8>,
}

/// One voice call against the voice endpoint.
pub struct VoiceSession {
    config: VoiceSessionConfig,
    client: ChannelClient,
    frames: Mutex<FrameState>,
}

impl VoiceSession {
    pub fn new(config: VoiceSessionConfig, handlers: VoiceHandlers) -> Self {
        let client = ChannelClient::new(config.channel.clone(), handlers.into_channel_handlers());
        Self {
            config,
            client,
            frames: Mutex::new(FrameState::default()),
        }
    }

    pub fn config(&self) -> &VoiceSessionConfig {
        &self.config
    }

    /// Open the session. `init` is re-sent after every reconnect.
    pub async fn start(&self) -> ChannelResult<()> {
        *self.frames.lock() = FrameState::default();
        self.client
            .connect_url(self.config.url.clone(), Some(self.config.init_message()))
            .await
    }

    pub async fn stop(&self) {
        self.client.disconnect().await;
        *self.frames.lock() = FrameState::default();
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Send normalized samples; returns the number of frames sent.
    pub fn send_samples(&self, samples: &[f32]) -> usize {
        if !self.client.is_connected() {
            *self.frames.lock() = FrameState::default();
            return 0;
        }
        let frames = self.frames.lock().framer.push_float(samples);
        self.send_frames(frames)
    }

    /// Send PCM16 LE bytes, reframed to fixed-size frames.
    pub fn send_pcm(&self, pcm: &[u8]) -> usize {
        if !self.client.is_connected() {
            *self.frames.lock() = FrameState::default();
            return 0;
        }
        let frames = {
            let mut state = self.frames.lock();
            let mut bytes = Vec::with_capacity(pcm.len() + 1);
            bytes.extend(state.carry.take());
            bytes.extend_from_slice(pcm);
            if bytes.len() % 2 == 1 {
                state.carry = bytes.pop();
            }
            let samples: Vec<i16> = bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect();
            state.framer.push_i16(&samples)
        };
        self.send_frames(frames)
    }

    /// Send the buffered partial frame, if any.
    pub fn flush(&self) -> bool {
        let frame = self.frames.lock().framer.flush();
        match frame {
            Some(frame) => self.client.send_binary(frame),
            None => false,
        }
    }

    /// Send an arbitrary message on the voice channel.
    pub fn send_message(&self, message: ChannelMessage) -> bool {
        self.client.send_message(message)
    }

    fn send_frames(&self, frames: Vec<Bytes>) -> usize {
        let mut sent = 0;
        for frame in frames {
            if !self.client.send_binary(frame) {
                tracing::warn!("Voice frame dropped after {} sent", sent);
                break;
            }
            sent += 1;
        }
        sent
    }
}
