//! Speech-to-text transports.
//!
//! Two interchangeable transports stream captured audio to the remote
//! transcription service:
//!
//! - [`StreamingPostTransport`]: one long-lived duplex HTTP POST whose body is
//!   fed chunk by chunk; the response body is the growing transcript.
//! - [`WebSocketTransport`]: PCM16 frames over the voice session; transcripts
//!   and synthesized audio come back on the same socket.
//!
//! The transport is selected once per session with [`create_speech_transport`].

mod streaming_post;
mod websocket;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use super::AudioError;
use super::debounce::TranscriptMode;
use crate::core::channel::BinaryCallback;
use crate::core::voice::VoiceSessionConfig;

pub use streaming_post::{StreamingPostTransport, Utf8Accumulator};
pub use websocket::WebSocketTransport;

/// Callback receiving the current transcript.
pub type TranscriptCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback receiving a pipeline failure.
pub type SpeechErrorCallback =
    Arc<dyn Fn(AudioError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Capture-to-transcript transport.
#[async_trait]
pub trait SpeechTransport: Send + Sync {
    fn kind(&self) -> SttTransportKind;

    /// Receive synthesized audio pushed back on the same transport, if any.
    fn set_audio_callback(&mut self, _callback: BinaryCallback) {}

    /// Begin a transcription stream.
    async fn start(
        &mut self,
        on_transcript: TranscriptCallback,
        on_error: SpeechErrorCallback,
    ) -> Result<(), AudioError>;

    /// Forward one captured chunk.
    async fn send_audio(&self, chunk: Bytes) -> Result<(), AudioError>;

    /// End input and wait for the remote side to finish.
    async fn finish(&mut self) -> Result<(), AudioError>;

    /// Abort immediately, dropping any in-flight stream.
    async fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Boxed transport selected at session start.
pub type BoxedSpeechTransport = Box<dyn SpeechTransport>;

/// Which transport to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttTransportKind {
    /// Streaming POST when duplex streaming is available, WebSocket otherwise
    #[default]
    Auto,
    StreamingPost,
    WebSocket,
}

impl SttTransportKind {
    /// Resolve `Auto` against the duplex-streaming capability.
    pub fn resolve(self, duplex_streaming: bool) -> SttTransportKind {
        match self {
            SttTransportKind::Auto if duplex_streaming => SttTransportKind::StreamingPost,
            SttTransportKind::Auto => SttTransportKind::WebSocket,
            other => other,
        }
    }

    /// How transcripts reported by this transport accumulate.
    pub fn transcript_mode(self) -> TranscriptMode {
        match self {
            SttTransportKind::WebSocket => TranscriptMode::Live,
            _ => TranscriptMode::Cumulative,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SttTransportKind::Auto => "auto",
            SttTransportKind::StreamingPost => "streaming_post",
            SttTransportKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for SttTransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SttTransportKind {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto" | "" => Ok(SttTransportKind::Auto),
            "streaming_post" | "post" | "http" => Ok(SttTransportKind::StreamingPost),
            "websocket" | "ws" => Ok(SttTransportKind::WebSocket),
            other => Err(AudioError::InvalidConfiguration(format!(
                "unknown STT transport '{other}'"
            ))),
        }
    }
}

/// Endpoints and capabilities available when a session starts.
#[derive(Debug, Clone, Default)]
pub struct SpeechEndpoints {
    /// Streaming STT endpoint
    pub stt_url: Option<Url>,
    /// Voice session used by the WebSocket transport
    pub voice: Option<VoiceSessionConfig>,
    /// Whether the HTTP stack can stream a request body while reading the response
    pub duplex_streaming: bool,
}

/// Build the transport for `kind`.
pub fn create_speech_transport(
    kind: SttTransportKind,
    endpoints: &SpeechEndpoints,
) -> Result<BoxedSpeechTransport, AudioError> {
    let resolved = kind.resolve(endpoints.duplex_streaming);
    tracing::info!("Selected STT transport: {} (requested {})", resolved, kind);

    match resolved {
        SttTransportKind::StreamingPost => {
            let url = endpoints.stt_url.clone().ok_or_else(|| {
                AudioError::FeatureUnavailable("streaming STT endpoint is not configured".to_string())
            })?;
            Ok(Box::new(StreamingPostTransport::new(url)))
        }
        SttTransportKind::WebSocket => {
            let voice = endpoints.voice.clone().ok_or_else(|| {
                AudioError::FeatureUnavailable("voice session is not configured".to_string())
            })?;
            Ok(Box::new(WebSocketTransport::new(voice)))
        }
        SttTransportKind::Auto => Err(AudioError::InvalidConfiguration(
            "transport kind did not resolve".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::voice::CharacterProfile;

    #[test]
    fn test_transcript_mode_per_transport() {
        assert_eq!(
            SttTransportKind::StreamingPost.transcript_mode(),
            TranscriptMode::Cumulative
        );
        assert_eq!(
            SttTransportKind::WebSocket.transcript_mode(),
            TranscriptMode::Live
        );
    }

    #[test]
    fn test_resolve_auto() {
        assert_eq!(
            SttTransportKind::Auto.resolve(true),
            SttTransportKind::StreamingPost
        );
        assert_eq!(
            SttTransportKind::Auto.resolve(false),
            SttTransportKind::WebSocket
        );
        assert_eq!(
            SttTransportKind::WebSocket.resolve(true),
            SttTransportKind::WebSocket
        );
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "streaming-post".parse::<SttTransportKind>().unwrap(),
            SttTransportKind::StreamingPost
        );
        assert_eq!(
            "WS".parse::<SttTransportKind>().unwrap(),
            SttTransportKind::WebSocket
        );
        assert!("carrier-pigeon".parse::<SttTransportKind>().is_err());
    }

    #[test]
    fn test_create_requires_endpoint() {
        let endpoints = SpeechEndpoints {
            duplex_streaming: true,
            ..Default::default()
        };
        let err = create_speech_transport(SttTransportKind::Auto, &endpoints).err();
        assert!(matches!(err, Some(AudioError::FeatureUnavailable(_))));
    }

    #[test]
    fn test_create_selects_kind() {
        let endpoints = SpeechEndpoints {
            stt_url: Some(Url::parse("http://localhost:9000/stt/stream").unwrap()),
            voice: Some(VoiceSessionConfig::new(
                Url::parse("ws://localhost:9000/ai-layer/ws/voice-session").unwrap(),
                "client",
                CharacterProfile::new("42"),
            )),
            duplex_streaming: true,
        };
        let post = create_speech_transport(SttTransportKind::Auto, &endpoints).unwrap();
        assert_eq!(post.kind(), SttTransportKind::StreamingPost);
        let ws = create_speech_transport(SttTransportKind::WebSocket, &endpoints).unwrap();
        assert_eq!(ws.kind(), SttTransportKind::WebSocket);
        assert!(!ws.is_active());
    }
}
