pub mod audio;
pub mod call;
pub mod channel;
pub mod voice;

// Re-export commonly used types for convenience
pub use channel::{
    AudioFraming, ChannelClient, ChannelConfig, ChannelError, ChannelHandlers, ChannelMessage,
    ChannelResult, ConnectionState, DisconnectReason, HeartbeatConfig, ReconnectionConfig,
    ReconnectionEvent,
};

pub use audio::{
    AudioChunkQueue, AudioError, AudioPlayer, AudioSink, BoxedSpeechTransport, PcmFramer,
    SpeechEndpoints, SpeechTransport, SttTransportKind, TranscriptDebouncer, TranscriptMode, TtsClient,
    create_speech_transport,
};

pub use voice::{CharacterProfile, VoiceHandlers, VoiceSession, VoiceSessionConfig};

pub use call::{CallConfig, CallSession, Pipeline, forward_messages};
