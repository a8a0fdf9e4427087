//! Call session: chat channel plus the speech pipeline.
//!
//! Debounced transcripts become `chat` messages, `text_response` messages are
//! synthesized into the playback queue, and every pipeline failure is kept as
//! a user-visible string for that pipeline only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::audio::{
    AudioChunkQueue, AudioError, AudioPlayer, AudioSink, BoxedSpeechTransport,
    DEFAULT_DEBOUNCE_MS, DEFAULT_PLAYBACK_TICK_MS, TtsClient, spawn_debouncer,
};
use crate::core::channel::{ChannelClient, ChannelMessage, MessageCallback};

/// How long `stop` waits for each task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pipelines whose failures are reported independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    SpeechToText,
    TextToSpeech,
    Playback,
    Chat,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::SpeechToText => write!(f, "speech-to-text"),
            Pipeline::TextToSpeech => write!(f, "text-to-speech"),
            Pipeline::Playback => write!(f, "playback"),
            Pipeline::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub debounce: Duration,
    pub playback_tick: Duration,
    pub queue_capacity: Option<usize>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            playback_tick: Duration::from_millis(DEFAULT_PLAYBACK_TICK_MS),
            queue_capacity: None,
        }
    }
}

/// Forward channel messages into `tx`, for [`CallSession::start`].
pub fn forward_messages(tx: mpsc::UnboundedSender<ChannelMessage>) -> MessageCallback {
    Arc::new(move |message| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(message);
        })
    })
}

struct Speech {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct CallInner {
    chat: Arc<ChannelClient>,
    tts: Option<TtsClient>,
    queue: Arc<AudioChunkQueue>,
    errors: Mutex<HashMap<Pipeline, String>>,
    speech: tokio::sync::Mutex<Option<Speech>>,
    cancel: CancellationToken,
}

impl CallInner {
    fn set_error(&self, pipeline: Pipeline, error: impl fmt::Display) {
        let message = error.to_string();
        tracing::warn!("{} pipeline error: {}", pipeline, message);
        self.errors.lock().insert(pipeline, message);
    }

    async fn handle_message(self: &Arc<Self>, message: ChannelMessage) {
        match message {
            ChannelMessage::TextResponse(text) => self.speak(text).await,
            ChannelMessage::Error(error) => self.set_error(Pipeline::Chat, error),
            ChannelMessage::Audio(data) => self.queue.push(data),
            other => tracing::debug!("Call ignoring '{}' message", other.message_type()),
        }
    }

    /// Replace whatever is being synthesized or queued with `text`.
    async fn speak(self: &Arc<Self>, text: String) {
        let mut speech = self.speech.lock().await;
        if let Some(previous) = speech.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }
        self.queue.clear();

        let Some(tts) = self.tts.clone() else {
            self.set_error(
                Pipeline::TextToSpeech,
                AudioError::FeatureUnavailable("TTS endpoint is not configured".to_string()),
            );
            return;
        };

        let cancel = self.cancel.child_token();
        let task_cancel = cancel.clone();
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            match tts.synthesize(&text, &inner.queue, &task_cancel).await {
                Ok(segments) => tracing::debug!("Synthesized {} audio segments", segments),
                Err(e) => inner.set_error(Pipeline::TextToSpeech, e),
            }
        });
        *speech = Some(Speech { cancel, handle });
    }
}

/// A running voice call bound to a chat channel.
pub struct CallSession {
    inner: Arc<CallInner>,
    transport: tokio::sync::Mutex<BoxedSpeechTransport>,
    sink: Arc<dyn AudioSink>,
    config: CallConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        chat: Arc<ChannelClient>,
        transport: BoxedSpeechTransport,
        tts: Option<TtsClient>,
        sink: Arc<dyn AudioSink>,
        config: CallConfig,
    ) -> Self {
        let queue = Arc::new(AudioChunkQueue::new(config.queue_capacity));
        Self {
            inner: Arc::new(CallInner {
                chat,
                tts,
                queue,
                errors: Mutex::new(HashMap::new()),
                speech: tokio::sync::Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
            transport: tokio::sync::Mutex::new(transport),
            sink,
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start playback, debouncing, message routing and the speech transport.
    ///
    /// A transport that fails to start only disables speech-to-text.
    pub async fn start(&self, messages: mpsc::UnboundedReceiver<ChannelMessage>) {
        let cancel = self.inner.cancel.clone();
        let mut tasks = Vec::new();

        tasks.push(
            AudioPlayer::new(
                self.inner.queue.clone(),
                self.sink.clone(),
                self.config.playback_tick,
            )
            .spawn(cancel.child_token()),
        );

        let chat = self.inner.chat.clone();
        let chat_errors = self.inner.clone();
        let mode = self.transport.lock().await.kind().transcript_mode();
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel::<String>();
        tasks.push(spawn_debouncer(
            transcript_rx,
            self.config.debounce,
            mode,
            Arc::new(move |utterance| {
                let chat = chat.clone();
                let inner = chat_errors.clone();
                Box::pin(async move {
                    tracing::info!("Sending utterance to chat: {}", utterance);
                    if !chat.send_chat(utterance) {
                        inner.set_error(Pipeline::Chat, "chat channel is not connected");
                    }
                })
            }),
            cancel.child_token(),
        ));

        let inner = self.inner.clone();
        let route_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            let mut messages = messages;
            loop {
                tokio::select! {
                    _ = route_cancel.cancelled() => break,
                    message = messages.recv() => match message {
                        Some(message) => inner.handle_message(message).await,
                        None => break,
                    },
                }
            }
        }));

        {
            let mut transport = self.transport.lock().await;
            let queue = self.inner.queue.clone();
            transport.set_audio_callback(Arc::new(move |audio: Bytes| {
                queue.push(audio);
                Box::pin(async {})
            }));

            let stt_errors = self.inner.clone();
            let result = transport
                .start(
                    Arc::new(move |transcript| {
                        let _ = transcript_tx.send(transcript);
                        Box::pin(async {})
                    }),
                    Arc::new(move |error| {
                        stt_errors.set_error(Pipeline::SpeechToText, error);
                        Box::pin(async {})
                    }),
                )
                .await;
            if let Err(e) = result {
                self.inner.set_error(Pipeline::SpeechToText, e);
            }
        }

        self.tasks.lock().extend(tasks);
        tracing::info!("Call session started");
    }

    /// Forward captured audio to the speech transport.
    pub async fn push_audio(&self, chunk: Bytes) -> bool {
        let transport = self.transport.lock().await;
        match transport.send_audio(chunk).await {
            Ok(()) => true,
            Err(e) => {
                self.inner.set_error(Pipeline::SpeechToText, e);
                false
            }
        }
    }

    /// Route one chat message as the call would.
    pub async fn handle_message(&self, message: ChannelMessage) {
        self.inner.handle_message(message).await;
    }

    /// Synthesize `text`, replacing any audio still queued.
    pub async fn speak(&self, text: impl Into<String>) {
        self.inner.speak(text.into()).await;
    }

    pub fn queue(&self) -> &Arc<AudioChunkQueue> {
        &self.inner.queue
    }

    pub fn last_error(&self, pipeline: Pipeline) -> Option<String> {
        self.inner.errors.lock().get(&pipeline).cloned()
    }

    pub fn clear_error(&self, pipeline: Pipeline) {
        self.inner.errors.lock().remove(&pipeline);
    }

    /// Stop every task, abort in-flight streams and drop queued audio.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(speech) = self.inner.speech.lock().await.take() {
            speech.handle.abort();
        }
        self.transport.lock().await.stop().await;

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                tracing::warn!("Call task did not stop in time, aborting");
                abort.abort();
            }
        }
        self.inner.queue.clear();
        tracing::info!("Call session stopped");
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{SpeechErrorCallback, SpeechTransport, SttTransportKind, TranscriptCallback};
    use crate::core::channel::{ChannelConfig, ChannelHandlers};
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _audio: Bytes) -> Result<(), AudioError> {
            Ok(())
        }
    }

    /// Transport that emits a fixed transcript on start.
    struct ScriptedTransport {
        transcript: &'static str,
        fail_start: bool,
    }

    #[async_trait]
    impl SpeechTransport for ScriptedTransport {
        fn kind(&self) -> SttTransportKind {
            SttTransportKind::StreamingPost
        }

        async fn start(
            &mut self,
            on_transcript: TranscriptCallback,
            _on_error: SpeechErrorCallback,
        ) -> Result<(), AudioError> {
            if self.fail_start {
                return Err(AudioError::FeatureUnavailable("no microphone".to_string()));
            }
            on_transcript(self.transcript.to_string()).await;
            Ok(())
        }

        async fn send_audio(&self, _chunk: Bytes) -> Result<(), AudioError> {
            Err(AudioError::TransportClosed("scripted".to_string()))
        }

        async fn finish(&mut self) -> Result<(), AudioError> {
            Ok(())
        }

        async fn stop(&mut self) {}

        fn is_active(&self) -> bool {
            false
        }
    }

    fn session(transport: ScriptedTransport) -> CallSession {
        let chat = Arc::new(ChannelClient::new(
            ChannelConfig::default(),
            ChannelHandlers::new(),
        ));
        CallSession::new(
            chat,
            Box::new(transport),
            None,
            Arc::new(NullSink),
            CallConfig {
                debounce: Duration::from_millis(20),
                ..Default::default()
            },
        )
    }

    /// Sink whose playback never finishes; records when the future is dropped.
    #[derive(Default)]
    struct StuckSink {
        started: Arc<std::sync::atomic::AtomicBool>,
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    struct SetOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioSink for StuckSink {
        async fn play(&self, _audio: Bytes) -> Result<(), AudioError> {
            let _guard = SetOnDrop(self.dropped.clone());
            self.started.store(true, std::sync::atomic::Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_aborts_task_that_ignores_cancel() {
        use std::sync::atomic::Ordering;

        let sink = Arc::new(StuckSink::default());
        let started = sink.started.clone();
        let dropped = sink.dropped.clone();
        let chat = Arc::new(ChannelClient::new(
            ChannelConfig::default(),
            ChannelHandlers::new(),
        ));
        let call = CallSession::new(
            chat,
            Box::new(ScriptedTransport {
                transcript: "",
                fail_start: false,
            }),
            None,
            sink,
            CallConfig {
                playback_tick: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let (_tx, rx) = mpsc::unbounded_channel();
        call.start(rx).await;

        call.handle_message(ChannelMessage::Audio(Bytes::from_static(b"pcm")))
            .await;
        for _ in 0..100 {
            if started.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(started.load(Ordering::SeqCst));

        call.stop().await;
        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_transport_is_isolated() {
        let call = session(ScriptedTransport {
            transcript: "",
            fail_start: true,
        });
        let (_tx, rx) = mpsc::unbounded_channel();
        call.start(rx).await;

        assert!(
            call.last_error(Pipeline::SpeechToText)
                .unwrap()
                .contains("no microphone")
        );
        assert!(call.last_error(Pipeline::TextToSpeech).is_none());

        call.handle_message(ChannelMessage::Audio(Bytes::from_static(b"pcm")))
            .await;
        assert_eq!(call.queue().len(), 1);
        call.stop().await;
        assert!(call.queue().is_empty());
    }

    #[tokio::test]
    async fn test_utterance_without_chat_records_chat_error() {
        let call = session(ScriptedTransport {
            transcript: "Hello there.",
            fail_start: false,
        });
        let (_tx, rx) = mpsc::unbounded_channel();
        call.start(rx).await;

        let mut reported = None;
        for _ in 0..50 {
            reported = call.last_error(Pipeline::Chat);
            if reported.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reported.as_deref(), Some("chat channel is not connected"));
        call.stop().await;
    }

    #[tokio::test]
    async fn test_text_response_without_tts_sets_error() {
        let call = session(ScriptedTransport {
            transcript: "",
            fail_start: false,
        });
        call.handle_message(ChannelMessage::Error("quota exceeded".to_string()))
            .await;
        call.handle_message(ChannelMessage::TextResponse("Hi!".to_string()))
            .await;
        assert_eq!(
            call.last_error(Pipeline::Chat).as_deref(),
            Some("quota exceeded")
        );
        assert!(call.last_error(Pipeline::TextToSpeech).is_some());
        call.clear_error(Pipeline::Chat);
        assert!(call.last_error(Pipeline::Chat).is_none());
    }

    #[tokio::test]
    async fn test_push_audio_failure_sets_stt_error() {
        let call = session(ScriptedTransport {
            transcript: "",
            fail_start: false,
        });
        assert!(!call.push_audio(Bytes::from_static(b"x")).await);
        assert!(call.last_error(Pipeline::SpeechToText).is_some());
    }
}
