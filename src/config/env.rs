//! Environment variable loading.

use std::str::FromStr;

use super::{ClientConfig, ConfigError};
use crate::core::channel::AudioFraming;

fn parse<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{other}'"),
            }),
        },
    }
}

fn parse_codes(key: &str, value: Option<String>) -> Result<Option<Vec<u16>>, ConfigError> {
    let Some(raw) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(|code| {
            code.trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("'{}': {e}", code.trim()),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn parse_framing(key: &str, value: Option<String>) -> Result<Option<AudioFraming>, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.replace('-', "_").as_str() {
            "binary" => Ok(Some(AudioFraming::Binary)),
            "json_array" | "json" => Ok(Some(AudioFraming::JsonArray)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'binary' or 'json_array', got '{other}'"),
            }),
        },
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Apply environment values from `lookup` on top of `config`.
pub(super) fn apply_env<F>(config: &mut ClientConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = non_empty(lookup("CHAT_WS_URL")) {
        config.chat_ws_url = Some(v);
    }
    if let Some(v) = non_empty(lookup("API_BASE_URL")) {
        config.api_base_url = Some(v);
    }
    if let Some(v) = non_empty(lookup("VOICE_WS_URL")) {
        config.voice_ws_url = Some(v);
    }
    if let Some(v) = non_empty(lookup("STT_STREAM_PATH")) {
        config.stt_stream_path = v;
    }
    if let Some(v) = non_empty(lookup("TTS_STREAM_PATH")) {
        config.tts_stream_path = v;
    }
    if let Some(v) = non_empty(lookup("TTS_VOICE_TYPE")) {
        config.tts_voice_type = v;
    }
    if let Some(v) = parse("STT_TRANSPORT", lookup("STT_TRANSPORT"))? {
        config.stt_transport = v;
    }
    if let Some(v) = parse_bool("DUPLEX_STREAMING", lookup("DUPLEX_STREAMING"))? {
        config.duplex_streaming = v;
    }

    let channel = &mut config.channel;
    if let Some(v) = parse("CONNECT_DELAY_MS", lookup("CONNECT_DELAY_MS"))? {
        channel.connect_delay_ms = v;
    }
    if let Some(v) = parse("CONNECT_TIMEOUT_MS", lookup("CONNECT_TIMEOUT_MS"))? {
        channel.connect_timeout_ms = v;
    }
    if let Some(v) = parse_framing("AUDIO_FRAMING", lookup("AUDIO_FRAMING"))? {
        channel.audio_framing = v;
    }

    let reconnection = &mut channel.reconnection;
    if let Some(v) = parse_bool("RECONNECT_ENABLED", lookup("RECONNECT_ENABLED"))? {
        reconnection.enabled = v;
    }
    if let Some(v) = parse("RECONNECT_MAX_ATTEMPTS", lookup("RECONNECT_MAX_ATTEMPTS"))? {
        reconnection.max_attempts = v;
    }
    if let Some(v) = parse("RECONNECT_BASE_DELAY_MS", lookup("RECONNECT_BASE_DELAY_MS"))? {
        reconnection.base_delay_ms = v;
    }
    if let Some(v) = parse("RECONNECT_MAX_DELAY_MS", lookup("RECONNECT_MAX_DELAY_MS"))? {
        reconnection.max_delay_ms = v;
    }
    if let Some(v) = parse_bool("RECONNECT_JITTER", lookup("RECONNECT_JITTER"))? {
        reconnection.jitter = v;
    }
    if let Some(v) = parse_codes("RECONNECTABLE_CLOSE_CODES", lookup("RECONNECTABLE_CLOSE_CODES"))?
    {
        reconnection.reconnectable_codes = v;
    }

    let heartbeat = &mut channel.heartbeat;
    if let Some(v) = parse("PING_INTERVAL_MS", lookup("PING_INTERVAL_MS"))? {
        heartbeat.ping_interval_ms = v;
    }
    if let Some(v) = parse("PING_TIMEOUT_MS", lookup("PING_TIMEOUT_MS"))? {
        heartbeat.ping_timeout_ms = v;
    }
    if let Some(v) = parse_bool("ANSWER_BARE_PING", lookup("ANSWER_BARE_PING"))? {
        heartbeat.answer_bare_ping = v;
    }

    if let Some(v) = parse("DEBOUNCE_MS", lookup("DEBOUNCE_MS"))? {
        config.debounce_ms = v;
    }
    if let Some(v) = parse("PLAYBACK_TICK_MS", lookup("PLAYBACK_TICK_MS"))? {
        config.playback_tick_ms = v;
    }
    if let Some(v) = parse::<usize>("PLAYBACK_QUEUE_CAPACITY", lookup("PLAYBACK_QUEUE_CAPACITY"))? {
        config.playback_queue_capacity = (v > 0).then_some(v);
    }

    Ok(())
}
