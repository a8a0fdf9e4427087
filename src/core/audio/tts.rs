//! Streaming text-to-speech client.
//!
//! `POST {text, voice_type}` to the TTS endpoint. The response body is an
//! incrementally delivered stream of newline-delimited base64 segments; each
//! decoded segment is appended to the playback queue as it arrives.

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::AudioError;
use super::queue::AudioChunkQueue;

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice_type: &'a str,
}

/// Client for the streaming TTS endpoint.
#[derive(Debug, Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    endpoint: Url,
    voice_type: String,
}

impl TtsClient {
    pub fn new(endpoint: Url, voice_type: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, voice_type)
    }

    pub fn with_client(http: reqwest::Client, endpoint: Url, voice_type: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            voice_type: voice_type.into(),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn voice_type(&self) -> &str {
        &self.voice_type
    }

    /// Synthesize `text` into `queue`.
    ///
    /// Returns the number of segments queued. Segments that fail to decode are
    /// skipped. Cancelling stops reading and drops the response stream.
    pub async fn synthesize(
        &self,
        text: &str,
        queue: &AudioChunkQueue,
        cancel: &CancellationToken,
    ) -> Result<usize, AudioError> {
        if text.trim().is_empty() {
            return Ok(0);
        }

        let request = self
            .http
            .post(self.endpoint.clone())
            .json(&TtsRequest {
                text,
                voice_type: &self.voice_type,
            });

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(0),
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
        let mut splitter = SegmentSplitter::default();
        let mut queued = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("TTS stream cancelled after {} segments", queued);
                    return Ok(queued);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| AudioError::Stream(e.to_string()))?;
            for segment in splitter.push(&chunk) {
                queued += queue_segment(queue, &segment);
            }
        }

        if let Some(segment) = splitter.finish() {
            queued += queue_segment(queue, &segment);
        }
        tracing::debug!("TTS stream finished with {} segments", queued);
        Ok(queued)
    }
}

fn queue_segment(queue: &AudioChunkQueue, segment: &str) -> usize {
    match queue.push_base64(segment) {
        Ok(()) => 1,
        Err(e) => {
            tracing::warn!("Skipping TTS segment: {}", e);
            0
        }
    }
}

/// Splits a byte stream into trimmed, non-empty lines.
#[derive(Debug, Default)]
struct SegmentSplitter {
    pending: Vec<u8>,
}

impl SegmentSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut segments = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(segment) = Self::clean(&line) {
                segments.push(segment);
            }
        }
        segments
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        Self::clean(&rest)
    }

    fn clean(line: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitter_handles_split_segments() {
        let mut splitter = SegmentSplitter::default();
        assert!(splitter.push(b"AQ").is_empty());
        assert_eq!(splitter.push(b"ID\nBA"), vec!["AQID".to_string()]);
        assert_eq!(splitter.push(b"UG\r\n\n"), vec!["BAUG".to_string()]);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn test_splitter_flushes_trailing_segment() {
        let mut splitter = SegmentSplitter::default();
        assert!(splitter.push(b"AQID").is_empty());
        assert_eq!(splitter.finish(), Some("AQID".to_string()));
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(TtsRequest {
            text: "Hello",
            voice_type: "female_warm",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"text": "Hello", "voice_type": "female_warm"})
        );
    }
}
