//! Voice session over the resilient channel.
//!
//! The voice endpoint (`/ai-layer/ws/voice-session`) speaks a small protocol
//! on top of the channel:
//!
//! - the client sends one JSON `init` message with character metadata every
//!   time a transport opens;
//! - the client then streams raw PCM16 LE binary frames of
//!   [`FRAME_SAMPLES`](crate::core::audio::FRAME_SAMPLES) samples;
//! - the server replies with binary PCM (synthesized speech) or JSON
//!   `{"type": "transcript"}` frames.

mod session;

pub use session::{
    CharacterProfile, VOICE_SESSION_PATH, VoiceHandlers, VoiceSession,
    VoiceSessionConfig, voice_url_from_chat_url,
};
