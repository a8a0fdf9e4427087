//! Duplex streaming POST transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{SpeechErrorCallback, SpeechTransport, SttTransportKind, TranscriptCallback};
use crate::core::audio::AudioError;

/// How long `finish` waits for the server to complete the transcript.
const FINISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Incremental UTF-8 decoder that carries incomplete sequences across chunks.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    carry: Vec<u8>,
}

impl Utf8Accumulator {
    /// Decode as much of `chunk` as forms complete characters.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(text) => {
                    out.push_str(text);
                    self.carry.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.carry[..valid]).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.carry.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush any trailing incomplete sequence.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

struct ActiveStream {
    audio_tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<String, AudioError>>,
}

/// Streams captured chunks as the body of one long-lived POST.
pub struct StreamingPostTransport {
    http: reqwest::Client,
    endpoint: Url,
    active: Option<ActiveStream>,
}

impl StreamingPostTransport {
    pub fn new(endpoint: Url) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            active: None,
        }
    }
}

async fn run_stream(
    http: reqwest::Client,
    endpoint: Url,
    mut audio_rx: mpsc::UnboundedReceiver<Bytes>,
    on_transcript: TranscriptCallback,
    cancel: CancellationToken,
) -> Result<String, AudioError> {
    let body_stream = async_stream::stream! {
        while let Some(chunk) = audio_rx.recv().await {
            yield Ok::<Bytes, std::io::Error>(chunk);
        }
    };

    let request = http
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(reqwest::Body::wrap_stream(body_stream));

    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(String::new()),
        response = request.send() => response?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AudioError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let mut stream = response.bytes_stream();
    let mut decoder = Utf8Accumulator::default();
    let mut transcript = String::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(transcript),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| AudioError::Stream(e.to_string()))?;
        let text = decoder.push(&chunk);
        if text.is_empty() {
            continue;
        }
        transcript.push_str(&text);
        on_transcript(transcript.clone()).await;
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        transcript.push_str(&tail);
        on_transcript(transcript.clone()).await;
    }
    Ok(transcript)
}

#[async_trait]
impl SpeechTransport for StreamingPostTransport {
    fn kind(&self) -> SttTransportKind {
        SttTransportKind::StreamingPost
    }

    async fn start(
        &mut self,
        on_transcript: TranscriptCallback,
        on_error: SpeechErrorCallback,
    ) -> Result<(), AudioError> {
        self.stop().await;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let task_cancel = cancel.clone();

        tracing::info!("Starting streaming STT POST to {}", self.endpoint);
        let handle = tokio::spawn(async move {
            let result = run_stream(http, endpoint, audio_rx, on_transcript, task_cancel).await;
            if let Err(e) = &result {
                tracing::error!("Streaming STT failed: {}", e);
                on_error(e.clone()).await;
            }
            result
        });

        self.active = Some(ActiveStream {
            audio_tx,
            cancel,
            handle,
        });
        Ok(())
    }

    async fn send_audio(&self, chunk: Bytes) -> Result<(), AudioError> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| AudioError::TransportClosed("stream not started".to_string()))?;
        active
            .audio_tx
            .send(chunk)
            .map_err(|_| AudioError::TransportClosed("request body closed".to_string()))
    }

    async fn finish(&mut self) -> Result<(), AudioError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        drop(active.audio_tx);
        let abort = active.handle.abort_handle();
        match tokio::time::timeout(FINISH_TIMEOUT, active.handle).await {
            Ok(Ok(result)) => result.map(|_| ()),
            Ok(Err(e)) => Err(AudioError::Stream(format!("STT task failed: {e}"))),
            Err(_) => {
                active.cancel.cancel();
                abort.abort();
                Err(AudioError::Stream("timed out waiting for transcript".to_string()))
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.handle.abort();
            tracing::debug!("Streaming STT aborted");
        }
    }

    fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.handle.is_finished())
    }
}
