//! Tick-coalesced playback of queued audio.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::AudioError;
use super::queue::AudioChunkQueue;

/// Default coalescing delay between wake-up and drain.
pub const DEFAULT_PLAYBACK_TICK_MS: u64 = 60;

/// Destination for playable audio buffers.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play one contiguous buffer. Returns once the sink has accepted it.
    async fn play(&self, audio: Bytes) -> Result<(), AudioError>;
}

/// Drains an [`AudioChunkQueue`] into an [`AudioSink`].
///
/// The player sleeps until the queue signals new data, waits one tick so
/// that closely spaced chunks coalesce, then plays everything queued as one
/// buffer.
pub struct AudioPlayer {
    queue: Arc<AudioChunkQueue>,
    sink: Arc<dyn AudioSink>,
    tick: Duration,
}

impl AudioPlayer {
    pub fn new(queue: Arc<AudioChunkQueue>, sink: Arc<dyn AudioSink>, tick: Duration) -> Self {
        Self { queue, sink, tick }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.notified() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let Some(buffer) = self.queue.drain_concat() else {
                continue;
            };
            tracing::debug!("Playing {} buffered audio bytes", buffer.len());
            if let Err(e) = self.sink.play(buffer).await {
                tracing::warn!("Audio playback failed: {}", e);
            }
        }
        tracing::debug!("Audio player stopped");
    }
}
