use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::core::audio::SttTransportKind;
use crate::core::channel::AudioFraming;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// endpoints:
///   chat_ws_url: "wss://chat.example.com/ws"
///   api_base_url: "https://api.example.com"
///   voice_ws_url: "wss://chat.example.com/ai-layer/ws/voice-session"
///   stt_stream_path: "/ai-layer/stt/stream"
///   tts_stream_path: "/ai-layer/tts/stream"
///
/// connection:
///   connect_delay_ms: 100
///   connect_timeout_ms: 10000
///   audio_framing: binary
///
/// reconnection:
///   enabled: true
///   max_attempts: 5
///   base_delay_ms: 1000
///   max_delay_ms: 30000
///   jitter: false
///   reconnectable_codes: [1001, 1005, 1006, 1011, 1012, 1013, 4000]
///
/// heartbeat:
///   ping_interval_ms: 30000
///   ping_timeout_ms: 10000
///   answer_bare_ping: true
///
/// speech:
///   stt_transport: auto
///   duplex_streaming: true
///   tts_voice_type: "default"
///   debounce_ms: 600
///
/// playback:
///   tick_ms: 60
///   queue_capacity: 256
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoints: Option<EndpointsYaml>,
    pub connection: Option<ConnectionYaml>,
    pub reconnection: Option<ReconnectionYaml>,
    pub heartbeat: Option<HeartbeatYaml>,
    pub speech: Option<SpeechYaml>,
    pub playback: Option<PlaybackYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub chat_ws_url: Option<String>,
    pub api_base_url: Option<String>,
    pub voice_ws_url: Option<String>,
    pub stt_stream_path: Option<String>,
    pub tts_stream_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub connect_delay_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub audio_framing: Option<AudioFraming>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectionYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub reconnectable_codes: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HeartbeatYaml {
    pub ping_interval_ms: Option<u64>,
    pub ping_timeout_ms: Option<u64>,
    pub answer_bare_ping: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpeechYaml {
    pub stt_transport: Option<SttTransportKind>,
    pub duplex_streaming: Option<bool>,
    pub tts_voice_type: Option<String>,
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlaybackYaml {
    pub tick_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Yaml(e.to_string()))
    }
}
