//! Client configuration.
//!
//! Settings come from `.env` files, environment variables and an optional YAML
//! file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use character_channel::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(Path::new("config.yaml"))?;
//! println!("Chat endpoint: {:?}", config.chat_ws_url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use url::Url;

mod env;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_PLAYBACK_TICK_MS, SpeechEndpoints, SttTransportKind,
};
use crate::core::call::CallConfig;
use crate::core::channel::ChannelConfig;
use crate::core::voice::{CharacterProfile, VoiceSessionConfig, voice_url_from_chat_url};
use crate::utils::{join_endpoint, validate_ws_url};

pub const DEFAULT_STT_STREAM_PATH: &str = "/ai-layer/stt/stream";
pub const DEFAULT_TTS_STREAM_PATH: &str = "/ai-layer/tts/stream";
pub const DEFAULT_TTS_VOICE_TYPE: &str = "default";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid YAML: {0}")]
    Yaml(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid URL for {key}: {message}")]
    InvalidUrl { key: String, message: String },

    #[error("Missing required setting: {0}")]
    Missing(String),
}

/// Resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Chat WebSocket endpoint (`ws://` or `wss://`)
    pub chat_ws_url: Option<String>,
    /// HTTP base for the STT and TTS streaming endpoints
    pub api_base_url: Option<String>,
    /// Voice session endpoint; derived from the chat URL when unset
    pub voice_ws_url: Option<String>,
    pub stt_stream_path: String,
    pub tts_stream_path: String,
    pub tts_voice_type: String,
    pub stt_transport: SttTransportKind,
    /// Whether the HTTP stack can stream a request body while reading the
    /// response. Resolves [`SttTransportKind::Auto`].
    pub duplex_streaming: bool,
    pub channel: ChannelConfig,
    pub debounce_ms: u64,
    pub playback_tick_ms: u64,
    /// `None` keeps the playback queue unbounded
    pub playback_queue_capacity: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chat_ws_url: None,
            api_base_url: None,
            voice_ws_url: None,
            stt_stream_path: DEFAULT_STT_STREAM_PATH.to_string(),
            tts_stream_path: DEFAULT_TTS_STREAM_PATH.to_string(),
            tts_voice_type: DEFAULT_TTS_VOICE_TYPE.to_string(),
            stt_transport: SttTransportKind::Auto,
            duplex_streaming: true,
            channel: ChannelConfig::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            playback_tick_ms: DEFAULT_PLAYBACK_TICK_MS,
            playback_queue_capacity: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// `.env` files are loaded by the binary at startup, so their values are
    /// already visible here.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        env::apply_env(&mut config, lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_file_with_lookup(path, |key| std::env::var(key).ok())
    }

    pub fn from_file_with_lookup<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::default();
        env::apply_env(&mut config, lookup)?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(endpoints) = yaml.endpoints {
            if endpoints.chat_ws_url.is_some() {
                self.chat_ws_url = endpoints.chat_ws_url;
            }
            if endpoints.api_base_url.is_some() {
                self.api_base_url = endpoints.api_base_url;
            }
            if endpoints.voice_ws_url.is_some() {
                self.voice_ws_url = endpoints.voice_ws_url;
            }
            if let Some(path) = endpoints.stt_stream_path {
                self.stt_stream_path = path;
            }
            if let Some(path) = endpoints.tts_stream_path {
                self.tts_stream_path = path;
            }
        }

        if let Some(connection) = yaml.connection {
            if let Some(v) = connection.connect_delay_ms {
                self.channel.connect_delay_ms = v;
            }
            if let Some(v) = connection.connect_timeout_ms {
                self.channel.connect_timeout_ms = v;
            }
            if let Some(v) = connection.audio_framing {
                self.channel.audio_framing = v;
            }
        }

        if let Some(reconnection) = yaml.reconnection {
            let target = &mut self.channel.reconnection;
            if let Some(v) = reconnection.enabled {
                target.enabled = v;
            }
            if let Some(v) = reconnection.max_attempts {
                target.max_attempts = v;
            }
            if let Some(v) = reconnection.base_delay_ms {
                target.base_delay_ms = v;
            }
            if let Some(v) = reconnection.max_delay_ms {
                target.max_delay_ms = v;
            }
            if let Some(v) = reconnection.jitter {
                target.jitter = v;
            }
            if let Some(v) = reconnection.reconnectable_codes {
                target.reconnectable_codes = v;
            }
        }

        if let Some(heartbeat) = yaml.heartbeat {
            let target = &mut self.channel.heartbeat;
            if let Some(v) = heartbeat.ping_interval_ms {
                target.ping_interval_ms = v;
            }
            if let Some(v) = heartbeat.ping_timeout_ms {
                target.ping_timeout_ms = v;
            }
            if let Some(v) = heartbeat.answer_bare_ping {
                target.answer_bare_ping = v;
            }
        }

        if let Some(speech) = yaml.speech {
            if let Some(v) = speech.stt_transport {
                self.stt_transport = v;
            }
            if let Some(v) = speech.duplex_streaming {
                self.duplex_streaming = v;
            }
            if let Some(v) = speech.tts_voice_type {
                self.tts_voice_type = v;
            }
            if let Some(v) = speech.debounce_ms {
                self.debounce_ms = v;
            }
        }

        if let Some(playback) = yaml.playback {
            if let Some(v) = playback.tick_ms {
                self.playback_tick_ms = v;
            }
            if let Some(v) = playback.queue_capacity {
                self.playback_queue_capacity = (v > 0).then_some(v);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.chat_ws_url {
            validate_ws_url(url).map_err(|e| ConfigError::InvalidUrl {
                key: "chat_ws_url".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(url) = &self.voice_ws_url {
            validate_ws_url(url).map_err(|e| ConfigError::InvalidUrl {
                key: "voice_ws_url".to_string(),
                message: e.to_string(),
            })?;
        }
        if self.playback_tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "playback_tick_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let reconnection = &self.channel.reconnection;
        if reconnection.base_delay_ms > reconnection.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "reconnection.base_delay_ms".to_string(),
                message: format!(
                    "{} exceeds max_delay_ms {}",
                    reconnection.base_delay_ms, reconnection.max_delay_ms
                ),
            });
        }
        Ok(())
    }

    /// Channel settings for the chat socket, with `base_url` filled in.
    pub fn chat_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            base_url: self.chat_ws_url.clone(),
            ..self.channel.clone()
        }
    }

    /// Voice session endpoint, explicit or derived from the chat URL.
    pub fn voice_url(&self) -> Result<Url, ConfigError> {
        if let Some(url) = &self.voice_ws_url {
            return validate_ws_url(url).map_err(|e| ConfigError::InvalidUrl {
                key: "voice_ws_url".to_string(),
                message: e.to_string(),
            });
        }
        let chat = self
            .chat_ws_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("voice_ws_url or chat_ws_url".to_string()))?;
        voice_url_from_chat_url(chat).map_err(|e| ConfigError::InvalidUrl {
            key: "chat_ws_url".to_string(),
            message: e.to_string(),
        })
    }

    pub fn stt_url(&self) -> Result<Url, ConfigError> {
        self.api_endpoint(&self.stt_stream_path)
    }

    pub fn tts_url(&self) -> Result<Url, ConfigError> {
        self.api_endpoint(&self.tts_stream_path)
    }

    fn api_endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = self
            .api_base_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("api_base_url".to_string()))?;
        join_endpoint(base, path).map_err(|e| ConfigError::InvalidUrl {
            key: "api_base_url".to_string(),
            message: e.to_string(),
        })
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            playback_tick: Duration::from_millis(self.playback_tick_ms),
            queue_capacity: self.playback_queue_capacity,
        }
    }

    /// Voice session settings for `character`.
    pub fn voice_session_config(
        &self,
        client_id: &str,
        character: CharacterProfile,
    ) -> Result<VoiceSessionConfig, ConfigError> {
        let mut config = VoiceSessionConfig::new(self.voice_url()?, client_id, character);
        config.channel = self.channel.clone();
        Ok(config)
    }

    /// Whatever speech endpoints are configured. Missing ones stay `None`
    /// and surface when the transport that needs them is created.
    pub fn speech_endpoints(
        &self,
        client_id: &str,
        character: CharacterProfile,
    ) -> SpeechEndpoints {
        SpeechEndpoints {
            stt_url: self.stt_url().ok(),
            voice: self.voice_session_config(client_id, character).ok(),
            duplex_streaming: self.duplex_streaming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::channel::AudioFraming;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.debounce_ms, 600);
        assert_eq!(config.playback_tick_ms, 60);
        assert_eq!(config.stt_stream_path, "/ai-layer/stt/stream");
        assert!(config.channel.reconnection.enabled);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CHAT_WS_URL", "ws://localhost:8000/ws"),
            ("RECONNECT_MAX_ATTEMPTS", "0"),
            ("RECONNECTABLE_CLOSE_CODES", "1006,4000"),
            ("PING_INTERVAL_MS", "1500"),
            ("AUDIO_FRAMING", "json_array"),
            ("STT_TRANSPORT", "websocket"),
            ("PLAYBACK_QUEUE_CAPACITY", "32"),
        ]))
        .unwrap();

        assert_eq!(config.chat_ws_url.as_deref(), Some("ws://localhost:8000/ws"));
        assert_eq!(config.channel.reconnection.max_attempts, 0);
        assert_eq!(config.channel.reconnection.reconnectable_codes, vec![1006, 4000]);
        assert_eq!(config.channel.heartbeat.ping_interval_ms, 1500);
        assert_eq!(config.channel.audio_framing, AudioFraming::JsonArray);
        assert_eq!(config.stt_transport, SttTransportKind::WebSocket);
        assert_eq!(config.playback_queue_capacity, Some(32));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("PING_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PING_TIMEOUT_MS"));
    }

    #[test]
    fn test_invalid_chat_url_rejected() {
        let err =
            ClientConfig::from_lookup(lookup(&[("CHAT_WS_URL", "http://x.example/ws")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_base_delay_above_cap_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("RECONNECT_BASE_DELAY_MS", "5000"),
            ("RECONNECT_MAX_DELAY_MS", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_yaml_overrides_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "endpoints:\n  chat_ws_url: \"wss://yaml.example.com/ws\"\nheartbeat:\n  ping_timeout_ms: 2500\nplayback:\n  queue_capacity: 0\n",
        )
        .unwrap();

        let config = ClientConfig::from_file_with_lookup(
            &path,
            lookup(&[
                ("CHAT_WS_URL", "ws://env.example.com/ws"),
                ("PING_INTERVAL_MS", "7000"),
                ("PLAYBACK_QUEUE_CAPACITY", "8"),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.chat_ws_url.as_deref(),
            Some("wss://yaml.example.com/ws")
        );
        assert_eq!(config.channel.heartbeat.ping_timeout_ms, 2500);
        assert_eq!(config.channel.heartbeat.ping_interval_ms, 7000);
        assert_eq!(config.playback_queue_capacity, None);
    }

    #[test]
    fn test_voice_url_derived_from_chat() {
        let config = ClientConfig {
            chat_ws_url: Some("wss://chat.example.com/ws?token=abc".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.voice_url().unwrap().as_str(),
            "wss://chat.example.com/ai-layer/ws/voice-session"
        );

        let explicit = ClientConfig {
            voice_ws_url: Some("ws://localhost:9000/voice".to_string()),
            ..config
        };
        assert_eq!(
            explicit.voice_url().unwrap().as_str(),
            "ws://localhost:9000/voice"
        );

        assert!(matches!(
            ClientConfig::default().voice_url(),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_http_endpoints() {
        let config = ClientConfig {
            api_base_url: Some("https://api.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.stt_url().unwrap().as_str(),
            "https://api.example.com/ai-layer/stt/stream"
        );
        assert_eq!(
            config.tts_url().unwrap().as_str(),
            "https://api.example.com/ai-layer/tts/stream"
        );
        assert!(ClientConfig::default().stt_url().is_err());
    }

    #[test]
    fn test_speech_endpoints_partial() {
        let config = ClientConfig {
            chat_ws_url: Some("ws://localhost:8000/ws".to_string()),
            duplex_streaming: false,
            ..Default::default()
        };
        let endpoints = config.speech_endpoints("client-1", CharacterProfile::new("7"));
        assert!(endpoints.stt_url.is_none());
        assert!(endpoints.voice.is_some());
        assert!(!endpoints.duplex_streaming);
    }

    #[test]
    fn test_chat_channel_config_and_call_config() {
        let config = ClientConfig {
            chat_ws_url: Some("ws://localhost:8000/ws".to_string()),
            playback_queue_capacity: Some(4),
            ..Default::default()
        };
        assert_eq!(
            config.chat_channel_config().base_url.as_deref(),
            Some("ws://localhost:8000/ws")
        );
        let call = config.call_config();
        assert_eq!(call.debounce, Duration::from_millis(600));
        assert_eq!(call.queue_capacity, Some(4));
    }
}
