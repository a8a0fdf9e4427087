//! Streaming audio pipeline.
//!
//! - `pcm`: PCM16 conversion and fixed-size framing
//! - `queue`: FIFO playback chunk queue
//! - `player`: tick-coalesced playback into an [`AudioSink`]
//! - `tts`: streaming text-to-speech client feeding the queue
//! - `stt`: speech-to-text transports behind the [`SpeechTransport`] trait
//! - `debounce`: transcript endpointing before handing text to chat

pub mod debounce;
pub mod pcm;
pub mod player;
pub mod queue;
pub mod stt;
pub mod tts;

use thiserror::Error;

pub use debounce::{
    DEFAULT_DEBOUNCE_MS, TranscriptDebouncer, TranscriptMode, UtteranceCallback, ends_with_terminal_punctuation,
    spawn_debouncer,
};
pub use pcm::{FRAME_SAMPLES, PcmFramer, decode_pcm16, encode_pcm16, float_to_pcm16};
pub use player::{AudioPlayer, AudioSink, DEFAULT_PLAYBACK_TICK_MS};
pub use queue::AudioChunkQueue;
pub use stt::{
    BoxedSpeechTransport, SpeechEndpoints, SpeechErrorCallback, SpeechTransport,
    SttTransportKind, StreamingPostTransport, TranscriptCallback, WebSocketTransport,
    create_speech_transport,
};
pub use tts::TtsClient;

/// Errors raised by the audio pipeline.
///
/// Each error is isolated to the pipeline that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// A required capability is missing
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(String),

    /// The remote endpoint answered with a failure status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Request could not be sent or its body failed mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The sink rejected a buffer
    #[error("Playback error: {0}")]
    Playback(String),

    /// The transport is closed or was never started
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Local validation failed
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<reqwest::Error> for AudioError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AudioError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => AudioError::Stream(err.to_string()),
        }
    }
}
