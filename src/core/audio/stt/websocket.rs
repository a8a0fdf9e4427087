//! Voice-session WebSocket transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{SpeechErrorCallback, SpeechTransport, SttTransportKind, TranscriptCallback};
use crate::core::audio::AudioError;
use crate::core::channel::BinaryCallback;
use crate::core::voice::{VoiceHandlers, VoiceSession, VoiceSessionConfig};

/// Sends PCM16 frames over a [`VoiceSession`]. Inbound binary frames are
/// synthesized speech and go to the audio callback.
pub struct WebSocketTransport {
    config: VoiceSessionConfig,
    on_audio: Option<BinaryCallback>,
    session: Option<Arc<VoiceSession>>,
}

impl WebSocketTransport {
    pub fn new(config: VoiceSessionConfig) -> Self {
        Self {
            config,
            on_audio: None,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Arc<VoiceSession>> {
        self.session.as_ref()
    }
}

#[async_trait]
impl SpeechTransport for WebSocketTransport {
    fn kind(&self) -> SttTransportKind {
        SttTransportKind::WebSocket
    }

    fn set_audio_callback(&mut self, callback: BinaryCallback) {
        self.on_audio = Some(callback);
    }

    async fn start(
        &mut self,
        on_transcript: TranscriptCallback,
        on_error: SpeechErrorCallback,
    ) -> Result<(), AudioError> {
        self.stop().await;

        let handlers = VoiceHandlers {
            on_transcript: Some(on_transcript),
            on_audio: self.on_audio.clone(),
            on_error: Some(Arc::new(move |error| {
                let on_error = on_error.clone();
                Box::pin(async move {
                    on_error(AudioError::Stream(error.to_string())).await;
                })
            })),
            ..Default::default()
        };

        let session = Arc::new(VoiceSession::new(self.config.clone(), handlers));
        session
            .start()
            .await
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
        self.session = Some(session);
        Ok(())
    }

    async fn send_audio(&self, chunk: Bytes) -> Result<(), AudioError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| AudioError::TransportClosed("voice session not started".to_string()))?;
        if !session.is_connected() {
            return Err(AudioError::TransportClosed(format!(
                "voice session is {}",
                session.state()
            )));
        }
        session.send_pcm(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), AudioError> {
        if let Some(session) = &self.session {
            session.flush();
        }
        self.stop().await;
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
    }

    fn is_active(&self) -> bool {
        self.session.is_some()
    }
}
